//! ovsnetd - Open vSwitch network driver
//!
//! Attaches container networks and their endpoints to an Open vSwitch
//! bridge. Each endpoint gets a port on the bridge (a veth peer or an
//! internal port), tagged and policed according to its network's options,
//! and a persisted record so it survives a restart.
//!
//! # Architecture
//!
//! ```text
//! Driver ──> NetworkRegistry ──> PortLifecycleManager ──> TransactionExecutor ─┐
//!   │              │                       │                                   ├─ OVSDB
//!   │              ├──> LinkConfig         └──> SwitchCache <── change feed ───┘
//!   │              └──> EndpointStore
//!   └──> RestoreReconciler ──> NetworkLookup
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod link;
pub mod lookup;
pub mod ports;
pub mod registry;
pub mod restore;
pub mod shell;
pub mod store;
pub mod types;

pub use config::{DriverConfig, OvsnetConfig, StoreConfig, SwitchConfig, DEFAULT_CONFIG_PATH};
pub use driver::Driver;
pub use error::{DriverError, Result};
pub use link::{IpCommandLink, LinkConfig};
pub use lookup::{NetworkInfo, NetworkLookup, NoNetworkLookup};
pub use ports::{PortLifecycleManager, PortSettings};
pub use registry::{Endpoint, JoinInfo, Network, NetworkRegistry, Subnet};
pub use restore::{RestoreReconciler, RestoreReport};
pub use store::{EndpointRecord, EndpointStore, FileEndpointStore, MemoryEndpointStore};
pub use types::NetworkOptions;

use ovsdb_client::{OvsdbTransport, SwitchDb};
use std::sync::Arc;

/// Opens the switch database on `transport` and assembles a driver.
pub async fn build_driver(
    config: &OvsnetConfig,
    transport: Arc<dyn OvsdbTransport>,
    links: Arc<dyn LinkConfig>,
    store: Arc<dyn EndpointStore>,
) -> Result<Driver> {
    let switch = SwitchDb::open(transport, config.switch.database.clone()).await?;
    let ports = PortLifecycleManager::new(switch, config.switch.bridge.clone());
    let registry = NetworkRegistry::new(ports, links, store, config.driver.clone());
    Ok(Driver::new(Arc::new(registry)))
}
