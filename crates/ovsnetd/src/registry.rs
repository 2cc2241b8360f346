//! Networks and their endpoints.
//!
//! The registry map only guards id -> network; every network guards its own
//! endpoint map. Neither lock is held across an await, and neither is held
//! while the switch cache is consulted.
//!
//! An endpoint id is reserved on its network before any switch or link work
//! starts, and a network with endpoints or reservations cannot be removed.

use ovsnet_types::{InterfaceType, IpAddress, IpPrefix, MacAddress};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::link::LinkConfig;
use crate::ports::{PortLifecycleManager, PortSettings};
use crate::store::{EndpointRecord, EndpointStore};
use crate::types::{EndpointInterface, IpamData, NetworkOptions};

/// Random characters appended to the interface prefix.
const INTERFACE_SUFFIX_LEN: usize = 7;

/// Attempts at finding an unused interface name.
const INTERFACE_NAME_ATTEMPTS: usize = 3;

/// An address pool of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    /// Pool with host bits cleared.
    pub pool: IpPrefix,
    pub gateway: Option<IpPrefix>,
}

impl Subnet {
    /// Parses a pool and its optional gateway.
    pub fn from_ipam(data: &IpamData) -> Result<Self> {
        let pool: IpPrefix = data
            .pool
            .parse()
            .map_err(|e| DriverError::invalid("pool", format!("{}", e)))?;
        let gateway = if data.gateway.is_empty() {
            None
        } else {
            Some(parse_gateway(&data.gateway)?)
        };
        Ok(Self {
            pool: pool.network(),
            gateway,
        })
    }

    /// Returns true if `address` has this pool's mask length and lies
    /// inside it.
    pub fn contains(&self, address: &IpPrefix) -> bool {
        address.prefix_len() == self.pool.prefix_len() && self.pool.contains(address.address())
    }
}

fn parse_gateway(s: &str) -> Result<IpPrefix> {
    if let Ok(prefix) = s.parse::<IpPrefix>() {
        return Ok(prefix);
    }
    let address: IpAddress = s
        .parse()
        .map_err(|_| DriverError::invalid("gateway", format!("'{}' is not an address", s)))?;
    let len = if address.is_ipv4() { 32 } else { 128 };
    IpPrefix::new(address, len).map_err(|e| DriverError::invalid("gateway", e.to_string()))
}

/// An endpoint attached to a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub network_id: String,
    /// Name of the container-facing link; empty for records that never got
    /// one.
    pub interface_name: String,
    pub mac: Option<MacAddress>,
    /// Host address with the pool's mask length.
    pub address: Option<IpPrefix>,
    /// Index of the persisted record, 0 if not persisted.
    pub store_index: u64,
}

impl Endpoint {
    pub fn to_record(&self) -> EndpointRecord {
        EndpointRecord {
            id: self.id.clone(),
            nid: self.network_id.clone(),
            intf_name: self.interface_name.clone(),
            addr: self.address.map(|a| a.to_string()),
            mac: self.mac.map(|m| m.to_string()),
            index: self.store_index,
        }
    }

    pub fn from_record(record: &EndpointRecord) -> Result<Self> {
        let address = record
            .addr
            .as_deref()
            .map(str::parse::<IpPrefix>)
            .transpose()
            .map_err(|e| DriverError::invalid("addr", e.to_string()))?;
        let mac = record
            .mac
            .as_deref()
            .map(str::parse::<MacAddress>)
            .transpose()
            .map_err(|e| DriverError::invalid("mac", e.to_string()))?;
        Ok(Self {
            id: record.id.clone(),
            network_id: record.nid.clone(),
            interface_name: record.intf_name.clone(),
            mac,
            address,
            store_index: record.index,
        })
    }
}

#[derive(Debug, Default)]
struct Endpoints {
    entries: HashMap<String, Endpoint>,
    /// Ids whose creation is in progress.
    reserved: HashSet<String>,
    /// Set once the network has left the registry.
    detached: bool,
}

impl Endpoints {
    fn in_use(&self) -> usize {
        self.entries.len() + self.reserved.len()
    }
}

/// An endpoint id claimed for creation. Dropping it releases the id unless
/// [`commit`](Reservation::commit) registered the endpoint first.
#[derive(Debug)]
struct Reservation<'a> {
    network: &'a Network,
    id: String,
}

impl Reservation<'_> {
    fn commit(self, endpoint: Endpoint) {
        let mut endpoints = self.network.endpoints.lock();
        endpoints.reserved.remove(&self.id);
        endpoints.entries.insert(self.id.clone(), endpoint);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.network.endpoints.lock().reserved.remove(&self.id);
    }
}

/// A network: its pools, switch options and endpoints.
#[derive(Debug)]
pub struct Network {
    id: String,
    options: NetworkOptions,
    subnets: Vec<Subnet>,
    endpoints: Mutex<Endpoints>,
}

impl Network {
    pub fn new(id: impl Into<String>, subnets: Vec<Subnet>, options: NetworkOptions) -> Self {
        Self {
            id: id.into(),
            options,
            subnets,
            endpoints: Mutex::new(Endpoints::default()),
        }
    }

    /// Builds a network from IPAM pools; at least one pool is required.
    pub fn from_ipam(id: &str, pools: &[IpamData], options: NetworkOptions) -> Result<Self> {
        if id.is_empty() {
            return Err(DriverError::invalid("network id", "must not be empty"));
        }
        if pools.is_empty() {
            return Err(DriverError::invalid(
                "ipv4 data",
                format!("network {} has no address pool", id),
            ));
        }
        let subnets = pools
            .iter()
            .map(Subnet::from_ipam)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(id, subnets, options))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &NetworkOptions {
        &self.options
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    /// Returns the gateway of the first pool.
    pub fn gateway(&self) -> Option<IpPrefix> {
        self.subnets.first().and_then(|s| s.gateway)
    }

    /// Returns the subnet holding `address`, if any.
    pub fn subnet_for(&self, address: &IpPrefix) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.contains(address))
    }

    pub fn endpoint(&self, id: &str) -> Option<Endpoint> {
        self.endpoints.lock().entries.get(id).cloned()
    }

    pub fn endpoint_ids(&self) -> Vec<String> {
        self.endpoints.lock().entries.keys().cloned().collect()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().entries.len()
    }

    /// Adds or replaces an endpoint.
    pub fn insert_endpoint(&self, endpoint: Endpoint) {
        self.endpoints
            .lock()
            .entries
            .insert(endpoint.id.clone(), endpoint);
    }

    /// Claims `id` for an endpoint about to be created.
    fn reserve(&self, id: &str) -> Result<Reservation<'_>> {
        let mut endpoints = self.endpoints.lock();
        if endpoints.detached {
            return Err(DriverError::NetworkNotFound(self.id.clone()));
        }
        if endpoints.entries.contains_key(id) || !endpoints.reserved.insert(id.to_string()) {
            return Err(DriverError::invalid(
                "endpoint id",
                format!("endpoint {} already exists", id),
            ));
        }
        Ok(Reservation {
            network: self,
            id: id.to_string(),
        })
    }

    /// Marks the network as removed; fails while endpoints exist or are
    /// being created.
    fn detach(&self) -> Result<()> {
        let mut endpoints = self.endpoints.lock();
        let in_use = endpoints.in_use();
        if in_use > 0 {
            return Err(DriverError::NetworkInUse {
                id: self.id.clone(),
                endpoints: in_use,
            });
        }
        endpoints.detached = true;
        Ok(())
    }

    fn remove_endpoint(&self, id: &str) -> Option<Endpoint> {
        self.endpoints.lock().entries.remove(id)
    }

    fn set_store_index(&self, id: &str, index: u64) {
        if let Some(ep) = self.endpoints.lock().entries.get_mut(id) {
            ep.store_index = index;
        }
    }
}

/// What a successful join hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Link to move into the container.
    pub src_name: String,
    /// Name prefix of the link inside the container.
    pub dst_prefix: String,
    pub gateway: Option<IpAddress>,
}

/// Owns every network and drives endpoint create/join/leave/delete.
pub struct NetworkRegistry {
    networks: RwLock<HashMap<String, Arc<Network>>>,
    ports: PortLifecycleManager,
    links: Arc<dyn LinkConfig>,
    store: Arc<dyn EndpointStore>,
    config: DriverConfig,
}

impl NetworkRegistry {
    pub fn new(
        ports: PortLifecycleManager,
        links: Arc<dyn LinkConfig>,
        store: Arc<dyn EndpointStore>,
        config: DriverConfig,
    ) -> Self {
        Self {
            networks: RwLock::new(HashMap::new()),
            ports,
            links,
            store,
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn ports(&self) -> &PortLifecycleManager {
        &self.ports
    }

    pub fn links(&self) -> &Arc<dyn LinkConfig> {
        &self.links
    }

    pub fn store(&self) -> &Arc<dyn EndpointStore> {
        &self.store
    }

    /// Returns the switch port name of a container-facing interface.
    pub fn switch_port_name(&self, interface_name: &str) -> String {
        if self.config.use_veth {
            format!("v{}", interface_name)
        } else {
            interface_name.to_string()
        }
    }

    fn port_kind(&self) -> InterfaceType {
        if self.config.use_veth {
            InterfaceType::System
        } else {
            InterfaceType::Internal
        }
    }

    pub fn network(&self, id: &str) -> Option<Arc<Network>> {
        self.networks.read().get(id).cloned()
    }

    fn require_network(&self, id: &str) -> Result<Arc<Network>> {
        if id.is_empty() {
            return Err(DriverError::invalid("network id", "must not be empty"));
        }
        self.network(id)
            .ok_or_else(|| DriverError::NetworkNotFound(id.to_string()))
    }

    fn require_endpoint(network: &Network, id: &str) -> Result<Endpoint> {
        if id.is_empty() {
            return Err(DriverError::invalid("endpoint id", "must not be empty"));
        }
        network
            .endpoint(id)
            .ok_or_else(|| DriverError::EndpointNotFound(id.to_string()))
    }

    pub fn network_ids(&self) -> Vec<String> {
        self.networks.read().keys().cloned().collect()
    }

    /// Registers `network`, replacing an entry without endpoints.
    pub fn insert_network(&self, network: Network) -> Result<Arc<Network>> {
        let network = Arc::new(network);
        let mut networks = self.networks.write();
        if let Some(existing) = networks.get(network.id()) {
            existing.detach()?;
        }
        networks.insert(network.id().to_string(), network.clone());
        Ok(network)
    }

    /// Creates a network from its IPv4 pools and raw options.
    #[instrument(skip(self, pools, options))]
    pub fn create_network(
        &self,
        id: &str,
        pools: &[IpamData],
        options: &HashMap<String, Value>,
    ) -> Result<Arc<Network>> {
        let parsed = NetworkOptions::from_options(options)?;
        let network = self.insert_network(Network::from_ipam(id, pools, parsed)?)?;
        info!(
            network = id,
            vlan = parsed.vlan_tag(),
            bandwidth = parsed.bandwidth,
            burst = parsed.burst,
            subnets = network.subnets().len(),
            "Network created"
        );
        Ok(network)
    }

    /// Creates a network and echoes its raw options.
    pub fn allocate_network(
        &self,
        id: &str,
        pools: &[IpamData],
        options: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>> {
        self.create_network(id, pools, options)?;
        Ok(options.clone())
    }

    /// Tears down every endpoint of the network, then removes it.
    ///
    /// The first endpoint that fails to tear down aborts the call; the
    /// network and its remaining endpoints stay registered.
    #[instrument(skip(self))]
    pub async fn delete_network(&self, id: &str) -> Result<()> {
        let network = self.require_network(id)?;
        for endpoint_id in network.endpoint_ids() {
            self.teardown_endpoint(&network, &endpoint_id).await?;
        }
        self.remove_network(id)?;
        info!(network = id, "Network deleted");
        Ok(())
    }

    /// Removes an empty network.
    #[instrument(skip(self))]
    pub fn free_network(&self, id: &str) -> Result<()> {
        self.require_network(id)?;
        self.remove_network(id)?;
        info!(network = id, "Network freed");
        Ok(())
    }

    fn remove_network(&self, id: &str) -> Result<()> {
        let mut networks = self.networks.write();
        let Some(network) = networks.get(id) else {
            return Err(DriverError::NetworkNotFound(id.to_string()));
        };
        network.detach()?;
        networks.remove(id);
        Ok(())
    }

    /// Picks an interface name that no existing link uses.
    async fn generate_interface_name(&self) -> Result<String> {
        for _ in 0..INTERFACE_NAME_ATTEMPTS {
            let name = random_interface_name(&self.config.interface_prefix);
            if !self.links.link_exists(&name).await? {
                return Ok(name);
            }
            debug!(name, "Interface name in use, retrying");
        }
        Err(DriverError::internal(format!(
            "could not find a free interface name with prefix '{}'",
            self.config.interface_prefix
        )))
    }

    fn generate_mac(&self, address: &IpPrefix) -> MacAddress {
        match address.address().as_ipv4() {
            Some(v4) if self.config.mac_from_ip => MacAddress::from_ipv4(*v4),
            _ => MacAddress::random_local(),
        }
    }

    /// Creates an endpoint: switch port first, then registration, then the
    /// persisted record.
    ///
    /// A failure to persist is returned, but the port and the registration
    /// are kept.
    #[instrument(skip(self, interface))]
    pub async fn create_endpoint(
        &self,
        network_id: &str,
        endpoint_id: &str,
        interface: Option<&EndpointInterface>,
    ) -> Result<Endpoint> {
        let network = self.require_network(network_id)?;
        if endpoint_id.is_empty() {
            return Err(DriverError::invalid("endpoint id", "must not be empty"));
        }
        let reservation = network.reserve(endpoint_id)?;

        let interface = interface
            .filter(|i| !i.address.is_empty())
            .ok_or_else(|| DriverError::invalid("address", "endpoint has no IPv4 address"))?;
        let address: IpPrefix = interface
            .address
            .parse()
            .map_err(|e| DriverError::invalid("address", format!("{}", e)))?;
        if network.subnet_for(&address).is_none() {
            return Err(DriverError::NoMatchingSubnet {
                address: address.to_string(),
                network: network_id.to_string(),
            });
        }
        let mac = if interface.mac_address.is_empty() {
            self.generate_mac(&address)
        } else {
            interface
                .mac_address
                .parse()
                .map_err(|e| DriverError::invalid("mac address", format!("{}", e)))?
        };

        let interface_name = self.generate_interface_name().await?;
        let port_name = self.switch_port_name(&interface_name);

        if self.config.use_veth {
            self.links
                .create_veth_pair(&interface_name, &port_name)
                .await?;
            if let Err(e) = self.links.set_mac(&interface_name, &mac).await {
                self.discard_veth_pair(&interface_name, &port_name).await;
                return Err(e);
            }
        }

        let options = network.options();
        let settings = PortSettings {
            kind: self.port_kind(),
            vlan: options.vlan,
            bandwidth: options.bandwidth,
            burst: options.burst,
        };
        if let Err(e) = self.ports.add_port(&port_name, &settings).await {
            warn!(
                endpoint = endpoint_id,
                port = %port_name,
                address = %address,
                mac = %mac,
                error = %e,
                "Failed to add endpoint port"
            );
            if self.config.use_veth {
                self.discard_veth_pair(&interface_name, &port_name).await;
            }
            return Err(e);
        }

        let endpoint = Endpoint {
            id: endpoint_id.to_string(),
            network_id: network_id.to_string(),
            interface_name,
            mac: Some(mac),
            address: Some(address),
            store_index: 0,
        };
        reservation.commit(endpoint.clone());

        let mut record = endpoint.to_record();
        self.store.put_atomic(&mut record).await?;
        network.set_store_index(endpoint_id, record.index);

        info!(
            network = network_id,
            endpoint = endpoint_id,
            port = %port_name,
            address = %address,
            mac = %mac,
            "Endpoint created"
        );
        Ok(Endpoint {
            store_index: record.index,
            ..endpoint
        })
    }

    async fn discard_veth_pair(&self, name: &str, peer: &str) {
        if let Err(e) = self.links.delete_veth_pair(name, peer).await {
            warn!(name, peer, error = %e, "Failed to remove veth pair");
        }
    }

    /// Returns a registered endpoint.
    pub fn endpoint_info(&self, network_id: &str, endpoint_id: &str) -> Result<Endpoint> {
        let network = self.require_network(network_id)?;
        Self::require_endpoint(&network, endpoint_id)
    }

    /// Brings the endpoint's switch-facing link up after a short delay.
    #[instrument(skip(self))]
    pub async fn join(&self, network_id: &str, endpoint_id: &str) -> Result<JoinInfo> {
        let network = self.require_network(network_id)?;
        let endpoint = Self::require_endpoint(&network, endpoint_id)?;
        if endpoint.interface_name.is_empty() {
            return Err(DriverError::invalid(
                "interface name",
                format!("endpoint {} has no interface", endpoint_id),
            ));
        }
        let in_subnet = endpoint
            .address
            .as_ref()
            .is_some_and(|a| network.subnet_for(a).is_some());
        if !in_subnet {
            return Err(DriverError::NoMatchingSubnet {
                address: endpoint
                    .address
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                network: network_id.to_string(),
            });
        }

        let port_name = self.switch_port_name(&endpoint.interface_name);
        tokio::time::sleep(self.config.link_up_delay()).await;
        self.links.set_link_up(&port_name).await?;

        info!(
            network = network_id,
            endpoint = endpoint_id,
            port = %port_name,
            "Endpoint joined"
        );
        Ok(JoinInfo {
            src_name: endpoint.interface_name,
            dst_prefix: self.config.container_iface_prefix.clone(),
            gateway: network.gateway().map(|g| *g.address()),
        })
    }

    /// Detaches the endpoint from the switch and forgets it.
    #[instrument(skip(self))]
    pub async fn leave(&self, network_id: &str, endpoint_id: &str) -> Result<()> {
        let network = self.require_network(network_id)?;
        self.teardown_endpoint(&network, endpoint_id).await
    }

    /// Same as [`leave`](Self::leave).
    #[instrument(skip(self))]
    pub async fn delete_endpoint(&self, network_id: &str, endpoint_id: &str) -> Result<()> {
        let network = self.require_network(network_id)?;
        self.teardown_endpoint(&network, endpoint_id).await
    }

    /// Removes `port_name` from the bridge.
    ///
    /// A port missing from the cache is looked up on the switch itself: if
    /// it is absent there too it is already gone, otherwise the cache lags
    /// and [`DriverError::PortNotCached`] is returned.
    pub async fn detach_port(&self, port_name: &str) -> Result<()> {
        match self.ports.del_port(port_name).await {
            Err(DriverError::PortNotCached(name)) => {
                if self.ports.port_on_switch(&name).await? {
                    return Err(DriverError::PortNotCached(name));
                }
                debug!(port = %name, "Port already gone from bridge");
                Ok(())
            }
            other => other,
        }
    }

    async fn teardown_endpoint(&self, network: &Network, endpoint_id: &str) -> Result<()> {
        let endpoint = Self::require_endpoint(network, endpoint_id)?;

        if endpoint.interface_name.is_empty() {
            debug!(endpoint = endpoint_id, "Endpoint has no interface, nothing to detach");
        } else {
            let port_name = self.switch_port_name(&endpoint.interface_name);
            self.detach_port(&port_name).await?;
            if self.config.use_veth {
                self.links
                    .delete_veth_pair(&endpoint.interface_name, &port_name)
                    .await?;
            }
        }

        network.remove_endpoint(endpoint_id);
        if let Err(e) = self.store.delete_atomic(&endpoint.to_record()).await {
            warn!(endpoint = endpoint_id, error = %e, "Failed to delete endpoint record");
        }
        info!(network = network.id(), endpoint = endpoint_id, "Endpoint removed");
        Ok(())
    }
}

/// Returns `prefix` followed by random lowercase hex characters.
pub fn random_interface_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..INTERFACE_SUFFIX_LEN)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    format!("{}{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::IpCommandLink;
    use crate::store::MemoryEndpointStore;
    use ovsdb_client::{InMemoryOvsdb, SwitchDb};
    use pretty_assertions::assert_eq;

    fn pool(cidr: &str, gateway: &str) -> IpamData {
        IpamData {
            pool: cidr.to_string(),
            gateway: gateway.to_string(),
            ..Default::default()
        }
    }

    fn iface(address: &str) -> EndpointInterface {
        EndpointInterface {
            address: address.to_string(),
            ..Default::default()
        }
    }

    async fn registry() -> (Arc<InMemoryOvsdb>, Arc<MemoryEndpointStore>, NetworkRegistry) {
        let db = Arc::new(InMemoryOvsdb::with_bridge("ovs-br0"));
        let switch = SwitchDb::open(db.clone(), "Open_vSwitch").await.unwrap();
        let store = Arc::new(MemoryEndpointStore::new());
        let config = DriverConfig {
            link_up_delay_ms: 0,
            ..Default::default()
        };
        let registry = NetworkRegistry::new(
            PortLifecycleManager::new(switch, "ovs-br0"),
            Arc::new(IpCommandLink::new().with_mock_mode()),
            store.clone(),
            config,
        );
        (db, store, registry)
    }

    #[test]
    fn test_subnet_contains_requires_same_mask() {
        let subnet = Subnet::from_ipam(&pool("10.0.0.0/24", "10.0.0.1/24")).unwrap();
        assert!(subnet.contains(&"10.0.0.5/24".parse().unwrap()));
        assert!(!subnet.contains(&"10.0.0.5/16".parse().unwrap()));
        assert!(!subnet.contains(&"10.0.1.5/24".parse().unwrap()));
    }

    #[test]
    fn test_subnet_pool_is_normalised() {
        let subnet = Subnet::from_ipam(&pool("10.0.0.7/24", "10.0.0.1")).unwrap();
        assert_eq!(subnet.pool.to_string(), "10.0.0.0/24");
        assert_eq!(subnet.gateway.unwrap().to_string(), "10.0.0.1/32");
    }

    #[test]
    fn test_network_validation() {
        assert!(Network::from_ipam("", &[pool("10.0.0.0/24", "")], Default::default()).is_err());
        assert!(Network::from_ipam("n1", &[], Default::default()).is_err());
        assert!(Network::from_ipam("n1", &[pool("bogus", "")], Default::default()).is_err());
    }

    #[test]
    fn test_random_interface_name() {
        let name = random_interface_name("port");
        assert_eq!(name.len(), 11);
        assert!(name.starts_with("port"));
        assert!(name[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_endpoint_record_conversion() {
        let endpoint = Endpoint {
            id: "e1".to_string(),
            network_id: "n1".to_string(),
            interface_name: "port1234567".to_string(),
            mac: Some("02:42:0a:00:00:05".parse().unwrap()),
            address: Some("10.0.0.5/24".parse().unwrap()),
            store_index: 3,
        };
        let record = endpoint.to_record();
        assert_eq!(record.addr.as_deref(), Some("10.0.0.5/24"));
        assert_eq!(Endpoint::from_record(&record).unwrap(), endpoint);

        let mut bad = record;
        bad.mac = Some("zz".to_string());
        assert!(Endpoint::from_record(&bad).is_err());
    }

    #[tokio::test]
    async fn test_create_network_replaces_only_empty_network() {
        let (_db, _store, registry) = registry().await;
        let opts = HashMap::new();
        registry
            .create_network("n1", &[pool("10.0.0.0/24", "10.0.0.1/24")], &opts)
            .unwrap();
        registry
            .create_network("n1", &[pool("10.1.0.0/24", "")], &opts)
            .unwrap();
        assert_eq!(
            registry.network("n1").unwrap().subnets()[0].pool.to_string(),
            "10.1.0.0/24"
        );

        registry
            .create_endpoint("n1", "e1", Some(&iface("10.1.0.5/24")))
            .await
            .unwrap();
        let err = registry
            .create_network("n1", &[pool("10.2.0.0/24", "")], &opts)
            .unwrap_err();
        assert!(matches!(err, DriverError::NetworkInUse { endpoints: 1, .. }));
    }

    #[tokio::test]
    async fn test_create_endpoint_generates_mac_and_persists() {
        let (db, store, registry) = registry().await;
        registry
            .create_network("n1", &[pool("10.0.0.0/24", "10.0.0.1/24")], &HashMap::new())
            .unwrap();

        let endpoint = registry
            .create_endpoint("n1", "e1", Some(&iface("10.0.0.5/24")))
            .await
            .unwrap();
        let mac = endpoint.mac.unwrap();
        assert!(mac.is_local() && mac.is_unicast());
        assert_eq!(mac.as_bytes()[1], 0x42);
        assert!(endpoint.store_index > 0);

        let port_name = format!("v{}", endpoint.interface_name);
        assert_eq!(db.bridge_ports("ovs-br0"), vec![port_name]);
        assert_eq!(store.len(), 1);
        assert_eq!(
            registry.network("n1").unwrap().endpoint("e1").unwrap().store_index,
            endpoint.store_index
        );
    }

    #[tokio::test]
    async fn test_create_endpoint_rejects_foreign_address() {
        let (db, store, registry) = registry().await;
        registry
            .create_network("n1", &[pool("10.0.0.0/24", "")], &HashMap::new())
            .unwrap();

        let err = registry
            .create_endpoint("n1", "e1", Some(&iface("10.9.0.5/24")))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NoMatchingSubnet { .. }));
        assert!(db.transactions().is_empty());
        assert!(store.is_empty());
        assert_eq!(registry.network("n1").unwrap().endpoint_count(), 0);

        let err = registry.create_endpoint("n1", "e1", None).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_mac_from_ip() {
        let (_db, _store, mut registry) = registry().await;
        registry.config.mac_from_ip = true;
        registry
            .create_network("n1", &[pool("10.0.0.0/24", "")], &HashMap::new())
            .unwrap();
        let endpoint = registry
            .create_endpoint("n1", "e1", Some(&iface("10.0.0.5/24")))
            .await
            .unwrap();
        assert_eq!(endpoint.mac.unwrap().to_string(), "02:42:0a:00:00:05");
    }

    #[tokio::test]
    async fn test_reservation_blocks_duplicates_and_removal() {
        let (_db, _store, registry) = registry().await;
        let network = registry
            .create_network("n1", &[pool("10.0.0.0/24", "")], &HashMap::new())
            .unwrap();

        let reservation = network.reserve("e1").unwrap();
        assert!(network.reserve("e1").unwrap_err().is_validation());
        assert!(matches!(
            registry.free_network("n1"),
            Err(DriverError::NetworkInUse { endpoints: 1, .. })
        ));
        assert_eq!(network.endpoint_count(), 0);

        drop(reservation);
        registry.free_network("n1").unwrap();
        // a handle taken before removal gains no endpoints
        assert!(matches!(
            network.reserve("e1"),
            Err(DriverError::NetworkNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_creation_releases_id() {
        let (db, _store, registry) = registry().await;
        registry
            .create_network("n1", &[pool("10.0.0.0/24", "")], &HashMap::new())
            .unwrap();

        db.fail_next_transaction("constraint violation", "duplicate port name");
        assert!(registry
            .create_endpoint("n1", "e1", Some(&iface("10.0.0.5/24")))
            .await
            .is_err());
        registry
            .create_endpoint("n1", "e1", Some(&iface("10.0.0.5/24")))
            .await
            .unwrap();
        assert_eq!(db.bridge_ports("ovs-br0").len(), 1);
    }

    #[tokio::test]
    async fn test_free_network() {
        let (_db, _store, registry) = registry().await;
        assert!(matches!(
            registry.free_network("n1"),
            Err(DriverError::NetworkNotFound(_))
        ));
        registry
            .create_network("n1", &[pool("10.0.0.0/24", "")], &HashMap::new())
            .unwrap();
        registry.free_network("n1").unwrap();
        assert!(registry.network("n1").is_none());
    }
}
