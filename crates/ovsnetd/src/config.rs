//! Configuration file support for ovsnetd
//!
//! Loads and validates the daemon configuration from a TOML file.
//! Default location: /etc/ovsnet/ovsnetd.toml

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ovsnet/ovsnetd.toml";

/// Switch database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Path of the database server's unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Database name
    #[serde(default = "default_database")]
    pub database: String,

    /// Bridge that endpoint ports are attached to
    #[serde(default = "default_bridge")]
    pub bridge: String,
}

/// Endpoint store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// File holding persisted endpoint records
    #[serde(default = "default_store_path")]
    pub path: String,
}

/// Driver behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Capability scope reported to the orchestrator ("local" or "global")
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Attach endpoints through a veth pair instead of an internal port
    #[serde(default = "default_use_veth")]
    pub use_veth: bool,

    /// Derive generated MACs from the endpoint's IPv4 address
    #[serde(default)]
    pub mac_from_ip: bool,

    /// Delay before bringing the switch-facing link up on join
    #[serde(default = "default_link_up_delay")]
    pub link_up_delay_ms: u64,

    /// Prefix of generated interface names
    #[serde(default = "default_interface_prefix")]
    pub interface_prefix: String,

    /// Interface name prefix inside the container
    #[serde(default = "default_container_iface_prefix")]
    pub container_iface_prefix: String,
}

/// Complete ovsnetd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OvsnetConfig {
    /// Switch database configuration
    #[serde(default)]
    pub switch: SwitchConfig,

    /// Endpoint store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Driver configuration
    #[serde(default)]
    pub driver: DriverConfig,
}

// Default functions
fn default_socket_path() -> String {
    ovsdb_client::DEFAULT_SOCKET_PATH.to_string()
}

fn default_database() -> String {
    ovsdb_client::OVS_DATABASE.to_string()
}

fn default_bridge() -> String {
    "ovs-br0".to_string()
}

fn default_store_path() -> String {
    "/var/lib/ovsnet/endpoints.json".to_string()
}

fn default_scope() -> String {
    "global".to_string()
}

fn default_use_veth() -> bool {
    true
}

fn default_link_up_delay() -> u64 {
    300
}

fn default_interface_prefix() -> String {
    "port".to_string()
}

fn default_container_iface_prefix() -> String {
    "eth".to_string()
}

// Default implementations
impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            database: default_database(),
            bridge: default_bridge(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            use_veth: default_use_veth(),
            mac_from_ip: false,
            link_up_delay_ms: default_link_up_delay(),
            interface_prefix: default_interface_prefix(),
            container_iface_prefix: default_container_iface_prefix(),
        }
    }
}

impl DriverConfig {
    /// Returns the join delay as a Duration
    pub fn link_up_delay(&self) -> Duration {
        Duration::from_millis(self.link_up_delay_ms)
    }
}

impl OvsnetConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| DriverError::ConfigLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            DriverError::ConfigLoad { message, .. } => DriverError::ConfigLoad {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: OvsnetConfig = toml::from_str(contents).map_err(|e| DriverError::ConfigLoad {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file or use defaults if the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.switch.socket_path.is_empty() {
            return Err(DriverError::invalid_config(
                "switch.socket_path",
                "must not be empty",
            ));
        }
        if self.switch.database.is_empty() {
            return Err(DriverError::invalid_config(
                "switch.database",
                "must not be empty",
            ));
        }
        if self.switch.bridge.is_empty() {
            return Err(DriverError::invalid_config("switch.bridge", "must not be empty"));
        }
        if self.store.path.is_empty() {
            return Err(DriverError::invalid_config("store.path", "must not be empty"));
        }
        if !matches!(self.driver.scope.as_str(), "local" | "global") {
            return Err(DriverError::invalid_config(
                "driver.scope",
                format!("must be 'local' or 'global', got '{}'", self.driver.scope),
            ));
        }
        // "v" + prefix + 7 random characters must fit IFNAMSIZ
        if self.driver.interface_prefix.is_empty() || self.driver.interface_prefix.len() > 7 {
            return Err(DriverError::invalid_config(
                "driver.interface_prefix",
                "must be 1-7 characters",
            ));
        }
        if self.driver.container_iface_prefix.is_empty() {
            return Err(DriverError::invalid_config(
                "driver.container_iface_prefix",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = OvsnetConfig::default();
        assert_eq!(config.switch.socket_path, "/var/run/openvswitch/db.sock");
        assert_eq!(config.switch.database, "Open_vSwitch");
        assert_eq!(config.switch.bridge, "ovs-br0");
        assert_eq!(config.driver.scope, "global");
        assert!(config.driver.use_veth);
        assert!(!config.driver.mac_from_ip);
        assert_eq!(config.driver.link_up_delay(), Duration::from_millis(300));
        assert_eq!(config.driver.interface_prefix, "port");
        assert_eq!(config.driver.container_iface_prefix, "eth");
    }

    #[test]
    fn test_default_config_validates() {
        assert!(OvsnetConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_toml_config() {
        let toml_str = r#"
[switch]
socket_path = "/tmp/db.sock"
bridge = "br-test"

[store]
path = "/tmp/endpoints.json"

[driver]
scope = "local"
use_veth = false
link_up_delay_ms = 0
"#;
        let config = OvsnetConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.switch.socket_path, "/tmp/db.sock");
        assert_eq!(config.switch.bridge, "br-test");
        assert_eq!(config.switch.database, "Open_vSwitch");
        assert_eq!(config.store.path, "/tmp/endpoints.json");
        assert_eq!(config.driver.scope, "local");
        assert!(!config.driver.use_veth);
        assert_eq!(config.driver.link_up_delay_ms, 0);
        assert_eq!(config.driver.interface_prefix, "port");
    }

    #[test]
    fn test_partial_toml_config() {
        let config = OvsnetConfig::from_toml("[driver]\nmac_from_ip = true\n").unwrap();
        assert!(config.driver.mac_from_ip);
        assert_eq!(config.switch.bridge, "ovs-br0");
    }

    #[test]
    fn test_invalid_scope() {
        let result = OvsnetConfig::from_toml("[driver]\nscope = \"cluster\"\n");
        assert!(matches!(result, Err(DriverError::InvalidConfig { .. })));
    }

    #[test]
    fn test_invalid_bridge() {
        let mut config = OvsnetConfig::default();
        config.switch.bridge = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let result = OvsnetConfig::from_toml("[switch\nbridge = ");
        assert!(matches!(result, Err(DriverError::ConfigLoad { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[switch]\nbridge = \"br-file\"").unwrap();

        let config = OvsnetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.switch.bridge, "br-file");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = OvsnetConfig::load_or_default("/nonexistent/path/ovsnetd.toml").unwrap();
        assert_eq!(config.switch.bridge, "ovs-br0");
    }
}
