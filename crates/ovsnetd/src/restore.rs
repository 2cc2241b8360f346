//! Startup reconciliation of persisted endpoints.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{DriverError, Result};
use crate::lookup::NetworkLookup;
use crate::registry::{Endpoint, Network, NetworkRegistry};
use crate::store::{EndpointRecord, ENDPOINT_KEY_PREFIX};

/// Outcome of one restore pass.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Endpoints put back into their networks.
    pub restored: Vec<String>,
    /// Endpoints whose network is gone and whose leftovers were removed.
    pub orphans_removed: Vec<String>,
    /// Endpoints that could not be handled, with the reason.
    pub failures: Vec<(String, DriverError)>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rebuilds endpoint bookkeeping from the endpoint store before the driver
/// serves requests.
pub struct RestoreReconciler {
    registry: Arc<NetworkRegistry>,
    lookup: Arc<dyn NetworkLookup>,
}

impl RestoreReconciler {
    pub fn new(registry: Arc<NetworkRegistry>, lookup: Arc<dyn NetworkLookup>) -> Self {
        Self { registry, lookup }
    }

    /// Restores every persisted endpoint.
    ///
    /// Endpoints of a known or resolvable network are registered again
    /// without touching the switch. Endpoints of a vanished network have
    /// their port, veth pair and record removed, in that order; the record is
    /// kept if an earlier step fails so the next start retries. A network
    /// the lookup cannot answer for is not treated as vanished: its
    /// endpoints are left alone and reported as failures. A failing
    /// endpoint never stops the others.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<RestoreReport> {
        let records = self.registry.store().list(ENDPOINT_KEY_PREFIX).await?;
        debug!(records = records.len(), "Restoring endpoints");

        let mut report = RestoreReport::default();
        for record in records {
            let id = record.id.clone();
            match self.restore_one(record).await {
                Ok(true) => report.restored.push(id),
                Ok(false) => report.orphans_removed.push(id),
                Err(e) => {
                    warn!(endpoint = %id, error = %e, "Failed to restore endpoint");
                    report.failures.push((id, e));
                }
            }
        }

        info!(
            restored = report.restored.len(),
            orphans = report.orphans_removed.len(),
            failures = report.failures.len(),
            "Endpoint restore complete"
        );
        Ok(report)
    }

    /// Returns true if the endpoint was restored, false if it was an orphan
    /// and got cleaned up.
    async fn restore_one(&self, record: EndpointRecord) -> Result<bool> {
        let endpoint = Endpoint::from_record(&record)?;
        match self.resolve_network(&endpoint.network_id).await? {
            Some(network) => {
                debug!(
                    endpoint = %endpoint.id,
                    network = %endpoint.network_id,
                    "Restored endpoint"
                );
                network.insert_endpoint(endpoint);
                Ok(true)
            }
            None => {
                self.remove_orphan(&endpoint, &record).await?;
                Ok(false)
            }
        }
    }

    async fn resolve_network(&self, network_id: &str) -> Result<Option<Arc<Network>>> {
        if let Some(network) = self.registry.network(network_id) {
            return Ok(Some(network));
        }
        let Some(info) = self.lookup.lookup(network_id).await? else {
            return Ok(None);
        };
        let network = Network::from_ipam(network_id, &info.ipv4_pools, info.options)?;
        // another record of the same network may have inserted it meanwhile
        if let Some(existing) = self.registry.network(network_id) {
            return Ok(Some(existing));
        }
        info!(network = network_id, "Network resolved through lookup");
        self.registry.insert_network(network).map(Some)
    }

    async fn remove_orphan(&self, endpoint: &Endpoint, record: &EndpointRecord) -> Result<()> {
        info!(
            endpoint = %endpoint.id,
            network = %endpoint.network_id,
            "Network gone, removing stale endpoint"
        );
        if !endpoint.interface_name.is_empty() {
            let port_name = self.registry.switch_port_name(&endpoint.interface_name);
            self.registry.detach_port(&port_name).await?;
            if self.registry.config().use_veth {
                self.registry
                    .links()
                    .delete_veth_pair(&endpoint.interface_name, &port_name)
                    .await?;
            }
        }
        self.registry.store().delete_atomic(record).await
    }
}
