//! Switch port and interface lifecycle on the endpoint bridge.

use ovsdb_client::protocol::{named_uuid, set, uuid};
use ovsdb_client::tables::{self, columns};
use ovsdb_client::{Condition, Mutation, Mutator, Operation, Row, SwitchDb};
use ovsnet_types::{InterfaceType, VlanId, VlanMode};
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::{DriverError, Result};

const INTERFACE_REF: &str = "intf";
const PORT_REF: &str = "port";

/// Switch-side settings of one endpoint port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortSettings {
    pub kind: InterfaceType,
    /// Access tag; untagged ports are trunks.
    pub vlan: Option<VlanId>,
    /// Ingress policing rate in kbps, 0 = unlimited.
    pub bandwidth: u64,
    /// Ingress policing burst in kb, 0 = default.
    pub burst: u64,
}

/// Builds and executes the transactions that attach ports to, and detach
/// them from, the bridge.
#[derive(Clone)]
pub struct PortLifecycleManager {
    db: SwitchDb,
    bridge: String,
}

impl PortLifecycleManager {
    pub fn new(db: SwitchDb, bridge: impl Into<String>) -> Self {
        Self {
            db,
            bridge: bridge.into(),
        }
    }

    /// Returns the bridge ports are attached to.
    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn switch(&self) -> &SwitchDb {
        &self.db
    }

    /// Builds the operations creating interface and port `name` and adding
    /// the port to the bridge.
    pub fn add_port_ops(&self, name: &str, settings: &PortSettings) -> Vec<Operation> {
        let mut intf = Row::new();
        intf.insert(columns::NAME.into(), Value::from(name));
        intf.insert(columns::TYPE.into(), Value::from(settings.kind.as_str()));
        if settings.bandwidth != 0 {
            intf.insert(
                columns::INGRESS_POLICING_RATE.into(),
                Value::from(settings.bandwidth),
            );
        }
        if settings.burst != 0 {
            intf.insert(
                columns::INGRESS_POLICING_BURST.into(),
                Value::from(settings.burst),
            );
        }

        let mut port = Row::new();
        port.insert(columns::NAME.into(), Value::from(name));
        port.insert(columns::INTERFACES.into(), named_uuid(INTERFACE_REF));
        match settings.vlan {
            Some(tag) => {
                port.insert(columns::VLAN_MODE.into(), VlanMode::Access.as_str().into());
                port.insert(columns::TAG.into(), Value::from(tag.as_u16()));
            }
            None => {
                port.insert(columns::VLAN_MODE.into(), VlanMode::Trunk.as_str().into());
            }
        }

        vec![
            Operation::insert(tables::INTERFACE, intf, Some(INTERFACE_REF)),
            Operation::insert(tables::PORT, port, Some(PORT_REF)),
            Operation::mutate(
                tables::BRIDGE,
                vec![Condition::equals(columns::NAME, self.bridge.as_str())],
                vec![Mutation::new(
                    columns::PORTS,
                    Mutator::Insert,
                    set(vec![named_uuid(PORT_REF)]),
                )],
            ),
        ]
    }

    /// Builds the operations removing interface and port `name` and
    /// detaching port row `port_uuid` from the bridge.
    pub fn del_port_ops(&self, name: &str, port_uuid: &str) -> Vec<Operation> {
        vec![
            Operation::delete(
                tables::INTERFACE,
                vec![Condition::equals(columns::NAME, name)],
            ),
            Operation::delete(tables::PORT, vec![Condition::equals(columns::NAME, name)]),
            Operation::mutate(
                tables::BRIDGE,
                vec![Condition::equals(columns::NAME, self.bridge.as_str())],
                vec![Mutation::new(
                    columns::PORTS,
                    Mutator::Delete,
                    set(vec![uuid(port_uuid)]),
                )],
            ),
        ]
    }

    /// Creates port `name` on the bridge in one transaction.
    #[instrument(skip(self), fields(bridge = %self.bridge))]
    pub async fn add_port(&self, name: &str, settings: &PortSettings) -> Result<()> {
        let ops = self.add_port_ops(name, settings);
        self.db.executor().execute(&ops).await?;
        info!(port = name, "Port added to bridge");
        Ok(())
    }

    /// Removes port `name` from the bridge in one transaction.
    ///
    /// The port row is resolved through the switch cache; a port the cache
    /// has not seen yet fails with [`DriverError::PortNotCached`] and nothing
    /// is sent.
    #[instrument(skip(self), fields(bridge = %self.bridge))]
    pub async fn del_port(&self, name: &str) -> Result<()> {
        let port_uuid = self
            .db
            .cache()
            .find_uuid_by_name(tables::PORT, name)
            .ok_or_else(|| DriverError::PortNotCached(name.to_string()))?;

        let ops = self.del_port_ops(name, &port_uuid);
        self.db.executor().execute(&ops).await?;
        info!(port = name, "Port removed from bridge");
        Ok(())
    }

    /// Asks the switch, bypassing the cache, whether port `name` exists.
    #[instrument(skip(self))]
    pub async fn port_on_switch(&self, name: &str) -> Result<bool> {
        let ops = [Operation::select(
            tables::PORT,
            vec![Condition::equals(columns::NAME, name)],
        )];
        let replies = self.db.executor().execute(&ops).await?;
        let found = replies
            .first()
            .and_then(|r| r.rows.as_ref())
            .is_some_and(|rows| !rows.is_empty());
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_client::InMemoryOvsdb;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    async fn manager() -> (Arc<InMemoryOvsdb>, PortLifecycleManager) {
        let db = Arc::new(InMemoryOvsdb::with_bridge("ovs-br0"));
        let switch = SwitchDb::open(db.clone(), "Open_vSwitch").await.unwrap();
        (db, PortLifecycleManager::new(switch, "ovs-br0"))
    }

    #[tokio::test]
    async fn test_add_port_ops_access_with_policing() {
        let (_db, ports) = manager().await;
        let settings = PortSettings {
            kind: InterfaceType::Internal,
            vlan: Some(VlanId::new(100).unwrap()),
            bandwidth: 1000,
            burst: 100,
        };
        let ops = ports.add_port_ops("port1", &settings);
        assert_eq!(ops.len(), 3);
        assert_eq!(
            ops[0].to_json(),
            json!({
                "op": "insert",
                "table": "Interface",
                "uuid-name": "intf",
                "row": {
                    "name": "port1",
                    "type": "internal",
                    "ingress_policing_rate": 1000,
                    "ingress_policing_burst": 100
                }
            })
        );
        assert_eq!(
            ops[1].to_json(),
            json!({
                "op": "insert",
                "table": "Port",
                "uuid-name": "port",
                "row": {
                    "name": "port1",
                    "interfaces": ["named-uuid", "intf"],
                    "vlan_mode": "access",
                    "tag": 100
                }
            })
        );
        assert_eq!(ops[2].op_name(), "mutate");
        assert_eq!(ops[2].table(), "Bridge");
    }

    #[tokio::test]
    async fn test_add_port_ops_trunk_without_policing() {
        let (_db, ports) = manager().await;
        let ops = ports.add_port_ops("vport1", &PortSettings::default());

        let Operation::Insert { row, .. } = &ops[0] else {
            panic!("expected insert");
        };
        assert_eq!(row.get("type"), Some(&json!("")));
        assert!(row.get("ingress_policing_rate").is_none());
        assert!(row.get("ingress_policing_burst").is_none());

        let Operation::Insert { row, .. } = &ops[1] else {
            panic!("expected insert");
        };
        assert_eq!(row.get("vlan_mode"), Some(&json!("trunk")));
        assert!(row.get("tag").is_none());
    }

    #[tokio::test]
    async fn test_add_then_delete_port() {
        let (db, ports) = manager().await;
        ports
            .add_port("vport1", &PortSettings::default())
            .await
            .unwrap();
        assert_eq!(db.bridge_ports("ovs-br0"), vec!["vport1".to_string()]);
        assert!(ports
            .switch()
            .cache()
            .find_uuid_by_name("Port", "vport1")
            .is_some());

        ports.del_port("vport1").await.unwrap();
        assert!(db.bridge_ports("ovs-br0").is_empty());
        assert_eq!(db.count_named("Port", "vport1"), 0);
        assert_eq!(db.count_named("Interface", "vport1"), 0);
    }

    #[tokio::test]
    async fn test_del_port_cache_miss_sends_nothing() {
        let (db, ports) = manager().await;
        let err = ports.del_port("vport9").await.unwrap_err();
        assert!(matches!(err, DriverError::PortNotCached(ref n) if n == "vport9"));
        assert!(db.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_port_on_switch_ignores_cache() {
        let (db, ports) = manager().await;
        assert!(!ports.port_on_switch("vport1").await.unwrap());

        db.pause_feed();
        ports
            .add_port("vport1", &PortSettings::default())
            .await
            .unwrap();
        assert!(ports
            .switch()
            .cache()
            .find_uuid_by_name("Port", "vport1")
            .is_none());
        assert!(ports.port_on_switch("vport1").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_port_failure_is_verbatim() {
        let (db, ports) = manager().await;
        db.fail_next_transaction("constraint violation", "name exists");
        let err = ports
            .add_port("vport1", &PortSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "constraint violation(name exists)");
        assert!(db.bridge_ports("ovs-br0").is_empty());
    }
}
