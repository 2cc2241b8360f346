//! Network metadata lookup used when restoring endpoints.

use async_trait::async_trait;

use crate::error::{DriverError, Result};
use crate::types::{IpamData, NetworkOptions};

/// What the orchestrator knows about a network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ipv4_pools: Vec<IpamData>,
    pub options: NetworkOptions,
}

/// Resolves networks the registry does not hold.
#[async_trait]
pub trait NetworkLookup: Send + Sync {
    /// Returns the network's metadata, or `None` if the orchestrator
    /// confirms it no longer exists. An error means the answer is unknown.
    async fn lookup(&self, network_id: &str) -> Result<Option<NetworkInfo>>;
}

/// Used when no metadata service is configured: every network is unknown,
/// so restore keeps the endpoints it cannot place.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNetworkLookup;

#[async_trait]
impl NetworkLookup for NoNetworkLookup {
    async fn lookup(&self, network_id: &str) -> Result<Option<NetworkInfo>> {
        Err(DriverError::lookup(
            network_id,
            "no network metadata service configured",
        ))
    }
}
