//! Open vSwitch port and interface classifications.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value of the `type` column of an OVS `Interface` row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// A kernel network device that already exists (e.g. one end of a veth
    /// pair). Encoded as the empty string.
    #[default]
    System,
    /// A port whose kernel device is created by the switch itself.
    Internal,
}

impl InterfaceType {
    /// Returns the column value written to the switch database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::System => "",
            InterfaceType::Internal => "internal",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "system" => Ok(InterfaceType::System),
            "internal" => Ok(InterfaceType::Internal),
            _ => Err(ParseError::InvalidInterfaceType(s.to_string())),
        }
    }
}

/// Value of the `vlan_mode` column of an OVS `Port` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlanMode {
    /// Carries all VLANs.
    Trunk,
    /// Carries a single VLAN given by the port's `tag`.
    Access,
}

impl VlanMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            VlanMode::Trunk => "trunk",
            VlanMode::Access => "access",
        }
    }
}
