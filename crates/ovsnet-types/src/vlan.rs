//! VLAN tag type used for access ports.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// A network without a tag is represented as `Option<VlanId>::None`; its
/// ports are created in trunk mode. The raw wire value for "no tag" is 0.
///
/// # Examples
///
/// ```
/// use ovsnet_types::VlanId;
///
/// assert_eq!(VlanId::from_tag(0).unwrap(), None);
/// assert_eq!(VlanId::from_tag(100).unwrap().map(|v| v.as_u16()), Some(100));
/// assert!(VlanId::from_tag(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Minimum valid VLAN ID.
    pub const MIN: u16 = 1;

    /// Maximum valid VLAN ID.
    pub const MAX: u16 = 4094;

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the VLAN ID is not in the valid range (1-4094).
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    /// Interprets a raw tag where 0 means untagged.
    pub fn from_tag(tag: u16) -> Result<Option<Self>, ParseError> {
        if tag == 0 {
            return Ok(None);
        }
        Self::new(tag).map(Some)
    }

    /// Returns the VLAN ID as a u16.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u16 = s.trim().parse().map_err(|_| ParseError::InvalidVlanId(0))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_range() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
    }

    #[test]
    fn test_from_tag_zero_is_untagged() {
        assert_eq!(VlanId::from_tag(0).unwrap(), None);
        assert_eq!(VlanId::from_tag(10).unwrap(), Some(VlanId(10)));
    }

    #[test]
    fn test_parse() {
        let vlan: VlanId = " 100 ".parse().unwrap();
        assert_eq!(vlan.as_u16(), 100);
        assert!("abc".parse::<VlanId>().is_err());
    }
}
