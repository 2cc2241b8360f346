//! Client for the Open vSwitch configuration database (OVSDB).
//!
//! This crate provides the switch-side plumbing used by the ovsnet driver:
//!
//! - [`protocol`]: the subset of the RFC 7047 data model the driver speaks
//!   (insert/mutate/delete/select operations, conditions, row updates)
//! - [`OvsdbTransport`]: the seam over a database connection, with
//!   [`UnixSocketClient`] (JSON-RPC over the local socket) and
//!   [`InMemoryOvsdb`] (an in-process database for tests and dry runs)
//! - [`SwitchCache`]: rows of every table, kept current by the change feed
//! - [`TransactionExecutor`]: atomic multi-operation transactions with reply
//!   validation
//!
//! # Consistency
//!
//! The cache is updated asynchronously by the monitor feed. A successful
//! [`TransactionExecutor::execute`] does not imply the cache already holds the
//! rows it created; identifiers needed right away must be read from the
//! returned [`OperationResult`]s.
//!
//! # Example
//!
//! ```ignore
//! use ovsdb_client::{SwitchDb, UnixSocketClient};
//!
//! let client = UnixSocketClient::connect("/var/run/openvswitch/db.sock").await?;
//! let db = SwitchDb::open(Arc::new(client), "Open_vSwitch").await?;
//! let uuid = db.cache().find_uuid_by_name("Port", "vport1a2b3c4");
//! ```

mod cache;
mod client;
mod error;
mod executor;
mod memory;
pub mod protocol;
mod transport;

pub use cache::SwitchCache;
pub use client::UnixSocketClient;
pub use error::{OvsdbError, OvsdbResult};
pub use executor::{SwitchDb, TransactionExecutor};
pub use memory::InMemoryOvsdb;
pub use protocol::{
    Condition, Function, Mutation, Mutator, Operation, OperationResult, Row, RowUpdate,
    TableUpdates,
};
pub use transport::{ChangeFeedHandler, OvsdbTransport};

/// Name of the Open vSwitch database.
pub const OVS_DATABASE: &str = "Open_vSwitch";

/// Default path of the database server's local socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/openvswitch/db.sock";

/// Table and column names used by the driver.
pub mod tables {
    pub const BRIDGE: &str = "Bridge";
    pub const PORT: &str = "Port";
    pub const INTERFACE: &str = "Interface";

    /// Column names
    pub mod columns {
        pub const NAME: &str = "name";
        pub const TYPE: &str = "type";
        pub const PORTS: &str = "ports";
        pub const INTERFACES: &str = "interfaces";
        pub const VLAN_MODE: &str = "vlan_mode";
        pub const TAG: &str = "tag";
        pub const INGRESS_POLICING_RATE: &str = "ingress_policing_rate";
        pub const INGRESS_POLICING_BURST: &str = "ingress_policing_burst";
        pub const UUID: &str = "_uuid";
    }
}
