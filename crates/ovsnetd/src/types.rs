//! Request and response types of the driver API, and typed network options.

use ovsnet_types::VlanId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{DriverError, Result};

/// Option key holding driver-specific network options.
pub const GENERIC_OPTIONS_KEY: &str = "com.docker.network.generic";

/// Keys inside the generic option map.
pub mod option_keys {
    pub const VLAN: &str = "vlan";
    pub const BANDWIDTH: &str = "bandwidth";
    pub const BURST: &str = "burst";
    /// Misspelt burst key still written by older clients.
    pub const BURST_LEGACY: &str = "brust";
}

/// Per-network switch settings, parsed once at network creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Access VLAN; `None` makes endpoint ports trunks.
    pub vlan: Option<VlanId>,
    /// Ingress policing rate, 0 = off.
    pub bandwidth: u64,
    /// Ingress policing burst, 0 = off.
    pub burst: u64,
}

impl NetworkOptions {
    /// Parses the generic option map out of a network's raw options.
    ///
    /// A missing generic map yields the defaults. Values may be JSON numbers
    /// or numeric strings.
    pub fn from_options(options: &HashMap<String, Value>) -> Result<Self> {
        let generic = match options.get(GENERIC_OPTIONS_KEY) {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(DriverError::invalid(
                    GENERIC_OPTIONS_KEY,
                    format!("expected an object, got {}", other),
                ))
            }
        };

        let vlan = parse_number(generic.get(option_keys::VLAN), option_keys::VLAN)?;
        let vlan = u16::try_from(vlan)
            .ok()
            .and_then(|tag| VlanId::from_tag(tag).ok())
            .ok_or_else(|| {
                DriverError::invalid(option_keys::VLAN, format!("{} is not 0 or 1-4094", vlan))
            })?;

        let bandwidth = parse_number(generic.get(option_keys::BANDWIDTH), option_keys::BANDWIDTH)?;
        let burst = match generic.get(option_keys::BURST) {
            Some(v) => parse_number(Some(v), option_keys::BURST)?,
            None => parse_number(generic.get(option_keys::BURST_LEGACY), option_keys::BURST)?,
        };

        Ok(Self {
            vlan,
            bandwidth,
            burst,
        })
    }

    /// Returns the VLAN tag, 0 when untagged.
    pub fn vlan_tag(&self) -> u16 {
        self.vlan.map_or(0, |v| v.as_u16())
    }
}

fn parse_number(value: Option<&Value>, field: &str) -> Result<u64> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| DriverError::invalid(field, format!("{} is not a non-negative integer", n))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(0),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| DriverError::invalid(field, format!("'{}' is not a number", s))),
        Some(other) => Err(DriverError::invalid(
            field,
            format!("{} is not a number", other),
        )),
    }
}

/// Address pool assigned to a network by IPAM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpamData {
    pub address_space: String,
    /// Pool in CIDR notation.
    pub pool: String,
    /// Gateway in CIDR notation.
    pub gateway: String,
    pub aux_addresses: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesResponse {
    pub scope: String,
    pub connectivity_scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateNetworkRequest {
    pub network_id: String,
    pub options: HashMap<String, Value>,
    pub ipv4_data: Vec<IpamData>,
    pub ipv6_data: Vec<IpamData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocateNetworkRequest {
    pub network_id: String,
    pub options: HashMap<String, Value>,
    pub ipv4_data: Vec<IpamData>,
    pub ipv6_data: Vec<IpamData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocateNetworkResponse {
    pub options: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteNetworkRequest {
    pub network_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeNetworkRequest {
    pub network_id: String,
}

/// Interface addresses of an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointInterface {
    /// IPv4 address in CIDR notation.
    pub address: String,
    pub address_ipv6: String,
    pub mac_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateEndpointRequest {
    pub network_id: String,
    pub endpoint_id: String,
    pub interface: Option<EndpointInterface>,
    pub options: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateEndpointResponse {
    pub interface: Option<EndpointInterface>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteEndpointRequest {
    pub network_id: String,
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointInfoRequest {
    pub network_id: String,
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointInfoResponse {
    pub value: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
    pub network_id: String,
    pub endpoint_id: String,
    pub sandbox_key: String,
    pub options: HashMap<String, Value>,
}

/// Name of the interface moved into the container, and the prefix it is
/// renamed with there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceName {
    pub src_name: String,
    pub dst_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinResponse {
    pub interface_name: InterfaceName,
    /// IPv4 gateway address, empty when the network has none.
    pub gateway: String,
    pub disable_gateway_service: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaveRequest {
    pub network_id: String,
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryNotification {
    pub discovery_type: i32,
    pub discovery_data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramExternalConnectivityRequest {
    pub network_id: String,
    pub endpoint_id: String,
    pub options: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RevokeExternalConnectivityRequest {
    pub network_id: String,
    pub endpoint_id: String,
}
