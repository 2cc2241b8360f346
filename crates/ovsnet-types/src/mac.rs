//! MAC address type with parsing, formatting and endpoint address generation.

use crate::{Ipv4Address, ParseError};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// # Examples
///
/// ```
/// use ovsnet_types::MacAddress;
///
/// let mac: MacAddress = "02:42:0a:00:00:05".parse().unwrap();
/// assert_eq!(mac.to_string(), "02:42:0a:00:00:05");
/// assert!(mac.is_local() && mac.is_unicast());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The zero/null MAC address (00:00:00:00:00:00).
    pub const ZERO: MacAddress = MacAddress([0, 0, 0, 0, 0, 0]);

    /// First octet of every generated address: unicast, locally administered.
    pub const LOCAL_UNICAST_PREFIX: u8 = 0x02;

    /// Second octet of every generated address.
    pub const ORG_MARKER: u8 = 0x42;

    /// Creates a new MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Generates a fresh endpoint MAC.
    ///
    /// The low four octets come from the operating system's CSPRNG.
    pub fn random_local() -> Self {
        let mut tail = [0u8; 4];
        OsRng.fill_bytes(&mut tail);
        Self::with_tail(tail)
    }

    /// Generates an endpoint MAC whose low four octets are the given IPv4
    /// address, so distinct addresses on a network map to distinct MACs.
    pub fn from_ipv4(addr: Ipv4Address) -> Self {
        Self::with_tail(addr.octets())
    }

    fn with_tail(tail: [u8; 4]) -> Self {
        MacAddress([
            Self::LOCAL_UNICAST_PREFIX,
            Self::ORG_MARKER,
            tail[0],
            tail[1],
            tail[2],
            tail[3],
        ])
    }

    /// Returns the raw bytes of the MAC address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if this is a multicast address.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Returns true if this is a unicast address.
    pub const fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Returns true if this is a locally administered address.
    pub const fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Returns true if this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains(':') { ':' } else { '-' };

        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part.len() > 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn test_parse_and_display() {
        let mac: MacAddress = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_invalid_format() {
        assert!("invalid".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("gg:11:22:33:44:55".parse::<MacAddress>().is_err());
        assert!("001:11:22:33:44:55".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_random_local_marks_unicast_local() {
        for _ in 0..64 {
            let mac = MacAddress::random_local();
            assert_eq!(mac.as_bytes()[0] & 0x03, 0b10);
            assert_eq!(mac.as_bytes()[1], MacAddress::ORG_MARKER);
        }
    }

    #[test]
    fn test_random_local_does_not_repeat() {
        let macs: HashSet<MacAddress> = (0..200).map(|_| MacAddress::random_local()).collect();
        assert_eq!(macs.len(), 200);
    }

    #[test]
    fn test_from_ipv4_copies_octets() {
        let mac = MacAddress::from_ipv4(Ipv4Address::new(10, 0, 0, 5));
        assert_eq!(mac.to_string(), "02:42:0a:00:00:05");

        let other = MacAddress::from_ipv4(Ipv4Address::new(10, 0, 0, 6));
        assert_ne!(mac, other);
    }
}
