//! Common types for the ovsnet control plane.
//!
//! This crate provides type-safe representations of the network primitives
//! shared by the switch-database client and the network driver:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses, including generation of
//!   locally administered endpoint addresses
//! - [`IpAddress`]: IPv4 and IPv6 addresses
//! - [`IpPrefix`]: interface addresses and subnet pools in CIDR notation
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers used as access-port tags
//! - [`InterfaceType`] / [`VlanMode`]: Open vSwitch port classifications

mod ip;
mod mac;
mod port;
mod vlan;

pub use ip::{IpAddress, IpPrefix, Ipv4Address, Ipv6Address};
pub use mac::MacAddress;
pub use port::{InterfaceType, VlanMode};
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid interface type: {0}")]
    InvalidInterfaceType(String),
}
