//! Orchestrator-facing driver operations.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::lookup::NetworkLookup;
use crate::registry::NetworkRegistry;
use crate::restore::{RestoreReconciler, RestoreReport};
use crate::types::*;

/// Connectivity scope reported with the capabilities.
const CONNECTIVITY_SCOPE_GLOBAL: &str = "global";

/// Endpoint info keys.
pub mod info_keys {
    pub const INTERFACE_NAME: &str = "interface_name";
    pub const SWITCH_PORT: &str = "switch_port";
    pub const MAC_ADDRESS: &str = "mac_address";
    pub const ADDRESS: &str = "address";
}

/// The network driver: typed requests in, typed responses out.
#[derive(Clone)]
pub struct Driver {
    registry: Arc<NetworkRegistry>,
}

impl Driver {
    pub fn new(registry: Arc<NetworkRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    /// Reconciles persisted endpoints. Must run before the first request.
    pub async fn restore(&self, lookup: Arc<dyn NetworkLookup>) -> Result<RestoreReport> {
        RestoreReconciler::new(self.registry.clone(), lookup)
            .restore()
            .await
    }

    pub fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            scope: self.registry.config().scope.clone(),
            connectivity_scope: CONNECTIVITY_SCOPE_GLOBAL.to_string(),
        }
    }

    pub fn create_network(&self, req: &CreateNetworkRequest) -> Result<()> {
        self.registry
            .create_network(&req.network_id, &req.ipv4_data, &req.options)
            .map(|_| ())
    }

    pub fn allocate_network(&self, req: &AllocateNetworkRequest) -> Result<AllocateNetworkResponse> {
        let options = self
            .registry
            .allocate_network(&req.network_id, &req.ipv4_data, &req.options)?;
        Ok(AllocateNetworkResponse { options })
    }

    pub async fn delete_network(&self, req: &DeleteNetworkRequest) -> Result<()> {
        self.registry.delete_network(&req.network_id).await
    }

    pub fn free_network(&self, req: &FreeNetworkRequest) -> Result<()> {
        self.registry.free_network(&req.network_id)
    }

    /// Creates the endpoint and reports the MAC it was given.
    pub async fn create_endpoint(
        &self,
        req: &CreateEndpointRequest,
    ) -> Result<CreateEndpointResponse> {
        let endpoint = self
            .registry
            .create_endpoint(&req.network_id, &req.endpoint_id, req.interface.as_ref())
            .await?;
        let mac_address = endpoint.mac.map(|m| m.to_string()).unwrap_or_default();
        Ok(CreateEndpointResponse {
            interface: Some(EndpointInterface {
                mac_address,
                ..Default::default()
            }),
        })
    }

    pub async fn delete_endpoint(&self, req: &DeleteEndpointRequest) -> Result<()> {
        self.registry
            .delete_endpoint(&req.network_id, &req.endpoint_id)
            .await
    }

    pub fn endpoint_info(&self, req: &EndpointInfoRequest) -> Result<EndpointInfoResponse> {
        let endpoint = self
            .registry
            .endpoint_info(&req.network_id, &req.endpoint_id)?;

        let mut value = HashMap::new();
        if !endpoint.interface_name.is_empty() {
            value.insert(
                info_keys::SWITCH_PORT.to_string(),
                self.registry.switch_port_name(&endpoint.interface_name),
            );
            value.insert(info_keys::INTERFACE_NAME.to_string(), endpoint.interface_name);
        }
        if let Some(mac) = endpoint.mac {
            value.insert(info_keys::MAC_ADDRESS.to_string(), mac.to_string());
        }
        if let Some(address) = endpoint.address {
            value.insert(info_keys::ADDRESS.to_string(), address.to_string());
        }
        Ok(EndpointInfoResponse { value })
    }

    pub async fn join(&self, req: &JoinRequest) -> Result<JoinResponse> {
        let info = self
            .registry
            .join(&req.network_id, &req.endpoint_id)
            .await?;
        Ok(JoinResponse {
            interface_name: InterfaceName {
                src_name: info.src_name,
                dst_prefix: info.dst_prefix,
            },
            gateway: info.gateway.map(|g| g.to_string()).unwrap_or_default(),
            disable_gateway_service: false,
        })
    }

    pub async fn leave(&self, req: &LeaveRequest) -> Result<()> {
        self.registry.leave(&req.network_id, &req.endpoint_id).await
    }

    #[instrument(skip(self, _req))]
    pub fn discover_new(&self, _req: &DiscoveryNotification) -> Result<()> {
        debug!("Discovery notification ignored");
        Ok(())
    }

    #[instrument(skip(self, _req))]
    pub fn discover_delete(&self, _req: &DiscoveryNotification) -> Result<()> {
        debug!("Discovery notification ignored");
        Ok(())
    }

    pub fn program_external_connectivity(
        &self,
        req: &ProgramExternalConnectivityRequest,
    ) -> Result<()> {
        debug!(network = %req.network_id, endpoint = %req.endpoint_id, "External connectivity not managed");
        Ok(())
    }

    pub fn revoke_external_connectivity(
        &self,
        req: &RevokeExternalConnectivityRequest,
    ) -> Result<()> {
        debug!(network = %req.network_id, endpoint = %req.endpoint_id, "External connectivity not managed");
        Ok(())
    }
}
