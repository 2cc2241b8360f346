//! In-process switch database for tests and dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::OvsdbResult;
use crate::protocol::{
    self, Condition, Function, Mutation, Mutator, Operation, OperationResult, Row, RowUpdate,
    TableUpdates,
};
use crate::tables::{self, columns};
use crate::transport::{ChangeFeedHandler, OvsdbTransport};

type Tables = HashMap<String, HashMap<String, Row>>;

/// Error tag and details of a rejected operation.
type OpError = (String, String);

#[derive(Default)]
struct State {
    tables: Tables,
    transactions: Vec<Vec<Operation>>,
    fail_next: Option<OpError>,
    truncate_next: Option<usize>,
    handler: Option<Arc<dyn ChangeFeedHandler>>,
    paused: bool,
    held: Vec<TableUpdates>,
}

/// A switch database held in memory.
///
/// Transactions are applied to a working copy and committed only if every
/// operation succeeds, so a rejected transaction leaves no trace. Committed
/// changes are delivered to the monitor handler after the internal lock is
/// released, mimicking the asynchronous feed of a real server.
#[derive(Default)]
pub struct InMemoryOvsdb {
    state: Mutex<State>,
}

impl InMemoryOvsdb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a database holding a single empty bridge.
    pub fn with_bridge(name: &str) -> Self {
        let db = Self::new();
        let mut row = Row::new();
        row.insert(columns::NAME.into(), Value::from(name));
        row.insert(columns::PORTS.into(), protocol::set(Vec::new()));
        db.state
            .lock()
            .tables
            .entry(tables::BRIDGE.to_string())
            .or_default()
            .insert(Uuid::new_v4().to_string(), row);
        db
    }

    /// Makes the next transaction fail with `error` and `details` without
    /// applying anything.
    pub fn fail_next_transaction(&self, error: &str, details: &str) {
        self.state.lock().fail_next = Some((error.to_string(), details.to_string()));
    }

    /// Truncates the reply list of the next successful transaction to `len`
    /// entries.
    pub fn truncate_next_reply(&self, len: usize) {
        self.state.lock().truncate_next = Some(len);
    }

    /// Holds change notifications until [`resume_feed`](Self::resume_feed).
    pub fn pause_feed(&self) {
        self.state.lock().paused = true;
    }

    /// Delivers held notifications and resumes the feed.
    pub fn resume_feed(&self) {
        let (handler, held) = {
            let mut state = self.state.lock();
            state.paused = false;
            (state.handler.clone(), std::mem::take(&mut state.held))
        };
        if let Some(handler) = handler {
            for updates in &held {
                handler.update(updates);
            }
        }
    }

    /// Returns every transaction received, in order.
    pub fn transactions(&self) -> Vec<Vec<Operation>> {
        self.state.lock().transactions.clone()
    }

    /// Returns all rows of `table` with their uuids.
    pub fn rows(&self, table: &str) -> Vec<(String, Row)> {
        self.state.lock().tables.get(table).map_or_else(Vec::new, |rows| {
            rows.iter().map(|(u, r)| (u.clone(), r.clone())).collect()
        })
    }

    /// Returns the rows of `table` named `name`.
    pub fn rows_named(&self, table: &str, name: &str) -> Vec<Row> {
        self.rows(table)
            .into_iter()
            .map(|(_, row)| row)
            .filter(|row| row_name(row) == Some(name))
            .collect()
    }

    /// Returns the number of rows of `table` named `name`.
    pub fn count_named(&self, table: &str, name: &str) -> usize {
        self.rows_named(table, name).len()
    }

    /// Returns the names of the ports attached to `bridge`.
    pub fn bridge_ports(&self, bridge: &str) -> Vec<String> {
        let state = self.state.lock();
        let Some(bridge_row) = state
            .tables
            .get(tables::BRIDGE)
            .and_then(|rows| rows.values().find(|row| row_name(row) == Some(bridge)))
        else {
            return Vec::new();
        };
        let ports = state.tables.get(tables::PORT);
        let mut names: Vec<String> = protocol::set_elements(bridge_row.get(columns::PORTS))
            .iter()
            .filter_map(protocol::as_uuid)
            .filter_map(|id| ports.and_then(|p| p.get(id)))
            .filter_map(|row| row_name(row).map(str::to_string))
            .collect();
        names.sort();
        names
    }

    fn snapshot(tables: &Tables) -> TableUpdates {
        tables
            .iter()
            .map(|(table, rows)| {
                let rows = rows
                    .iter()
                    .map(|(uuid, row)| {
                        let update = RowUpdate {
                            old: None,
                            new: Some(row.clone()),
                        };
                        (uuid.clone(), update)
                    })
                    .collect();
                (table.clone(), rows)
            })
            .collect()
    }
}

fn row_name(row: &Row) -> Option<&str> {
    row.get(columns::NAME).and_then(Value::as_str)
}

/// Replaces every named-uuid reference inside `value` with its real uuid.
fn resolve_named(value: &Value, named: &HashMap<String, String>) -> Result<Value, OpError> {
    if let Some(name) = protocol::as_named_uuid(value) {
        return named.get(name).map(|id| protocol::uuid(id)).ok_or_else(|| {
            (
                "referential integrity violation".to_string(),
                format!("unknown named-uuid {name}"),
            )
        });
    }
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_named(v, named))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_named(v, named)?)))
            .collect::<Result<Row, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn matches(uuid: &str, row: &Row, conditions: &[Condition]) -> bool {
    conditions.iter().all(|cond| {
        let actual = if cond.column == columns::UUID {
            Some(protocol::uuid(uuid))
        } else {
            row.get(&cond.column).cloned()
        };
        match cond.function {
            Function::Eq => actual.as_ref() == Some(&cond.value),
            Function::Ne => actual.as_ref() != Some(&cond.value),
            Function::Includes | Function::Excludes => {
                let have = protocol::set_elements(actual.as_ref());
                let want = protocol::set_elements(Some(&cond.value));
                let included = want.iter().all(|v| have.contains(v));
                (cond.function == Function::Includes) == included
            }
        }
    })
}

fn mutate_row(row: &mut Row, mutation: &Mutation) {
    let mut items = protocol::set_elements(row.get(&mutation.column));
    let values = protocol::set_elements(Some(&mutation.value));
    match mutation.mutator {
        Mutator::Insert => {
            for v in values {
                if !items.contains(&v) {
                    items.push(v);
                }
            }
        }
        Mutator::Delete => items.retain(|v| !values.contains(v)),
    }
    row.insert(mutation.column.clone(), protocol::set(items));
}

fn apply(
    tables: &mut Tables,
    named: &HashMap<String, String>,
    op: &Operation,
) -> Result<OperationResult, OpError> {
    let resolve_conditions = |conditions: &[Condition]| -> Result<Vec<Condition>, OpError> {
        conditions
            .iter()
            .map(|c| {
                Ok(Condition {
                    value: resolve_named(&c.value, named)?,
                    ..c.clone()
                })
            })
            .collect()
    };

    match op {
        Operation::Insert {
            table,
            row,
            uuid_name,
        } => {
            let id = uuid_name
                .as_ref()
                .and_then(|n| named.get(n).cloned())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let Value::Object(row) = resolve_named(&Value::Object(row.clone()), named)? else {
                return Err(("syntax error".into(), "row is not an object".into()));
            };
            tables.entry(table.clone()).or_default().insert(id.clone(), row);
            Ok(OperationResult {
                uuid: Some(protocol::uuid(&id)),
                ..Default::default()
            })
        }
        Operation::Mutate {
            table,
            conditions,
            mutations,
        } => {
            let conditions = resolve_conditions(conditions)?;
            let mutations = mutations
                .iter()
                .map(|m| {
                    Ok(Mutation {
                        value: resolve_named(&m.value, named)?,
                        ..m.clone()
                    })
                })
                .collect::<Result<Vec<_>, OpError>>()?;
            let mut count = 0;
            if let Some(rows) = tables.get_mut(table) {
                for (uuid, row) in rows.iter_mut() {
                    if matches(uuid, row, &conditions) {
                        for m in &mutations {
                            mutate_row(row, m);
                        }
                        count += 1;
                    }
                }
            }
            Ok(OperationResult {
                count: Some(count),
                ..Default::default()
            })
        }
        Operation::Select { table, conditions } => {
            let conditions = resolve_conditions(conditions)?;
            let rows = tables.get(table).map_or_else(Vec::new, |rows| {
                rows.iter()
                    .filter(|(uuid, row)| matches(uuid, row, &conditions))
                    .map(|(_, row)| row.clone())
                    .collect()
            });
            Ok(OperationResult {
                rows: Some(rows),
                ..Default::default()
            })
        }
        Operation::Delete { table, conditions } => {
            let conditions = resolve_conditions(conditions)?;
            let mut count = 0;
            if let Some(rows) = tables.get_mut(table) {
                let before = rows.len();
                rows.retain(|uuid, row| !matches(uuid, row, &conditions));
                count = (before - rows.len()) as u64;
            }
            Ok(OperationResult {
                count: Some(count),
                ..Default::default()
            })
        }
    }
}

/// Rejects a commit that leaves a reference to a row that does not exist.
fn check_references(tables: &Tables) -> Result<(), OpError> {
    let known: HashSet<&str> = tables
        .values()
        .flat_map(|rows| rows.keys().map(String::as_str))
        .collect();
    for (table, rows) in tables {
        for row in rows.values() {
            for value in row.values() {
                for element in protocol::set_elements(Some(value)) {
                    if let Some(id) = protocol::as_uuid(&element) {
                        if !known.contains(id) {
                            return Err((
                                "referential integrity violation".into(),
                                format!("row in {table} references missing row {id}"),
                            ));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn diff(before: &Tables, after: &Tables) -> TableUpdates {
    let mut updates = TableUpdates::new();
    let names: HashSet<&String> = before.keys().chain(after.keys()).collect();
    for table in names {
        let empty = HashMap::new();
        let old_rows = before.get(table).unwrap_or(&empty);
        let new_rows = after.get(table).unwrap_or(&empty);
        let mut changed = HashMap::new();
        for (uuid, old) in old_rows {
            if !new_rows.contains_key(uuid) {
                let update = RowUpdate {
                    old: Some(old.clone()),
                    new: None,
                };
                changed.insert(uuid.clone(), update);
            }
        }
        for (uuid, new) in new_rows {
            let old = old_rows.get(uuid);
            if old != Some(new) {
                let update = RowUpdate {
                    old: old.cloned(),
                    new: Some(new.clone()),
                };
                changed.insert(uuid.clone(), update);
            }
        }
        if !changed.is_empty() {
            updates.insert(table.clone(), changed);
        }
    }
    updates
}

#[async_trait]
impl OvsdbTransport for InMemoryOvsdb {
    async fn transact(
        &self,
        _database: &str,
        operations: &[Operation],
    ) -> OvsdbResult<Vec<OperationResult>> {
        let mut state = self.state.lock();
        state.transactions.push(operations.to_vec());

        if let Some((error, details)) = state.fail_next.take() {
            debug!(%error, "Injected transaction failure");
            return Ok(vec![OperationResult {
                error: Some(error),
                details: Some(details),
                ..Default::default()
            }]);
        }

        let named: HashMap<String, String> = operations
            .iter()
            .filter_map(|op| match op {
                Operation::Insert {
                    uuid_name: Some(name),
                    ..
                } => Some((name.clone(), Uuid::new_v4().to_string())),
                _ => None,
            })
            .collect();

        let mut working = state.tables.clone();
        let mut replies = Vec::with_capacity(operations.len());
        for op in operations {
            match apply(&mut working, &named, op) {
                Ok(reply) => replies.push(reply),
                Err((error, details)) => {
                    replies.push(OperationResult {
                        error: Some(error),
                        details: Some(details),
                        ..Default::default()
                    });
                    return Ok(replies);
                }
            }
        }
        if let Err((error, details)) = check_references(&working) {
            replies.push(OperationResult {
                error: Some(error),
                details: Some(details),
                ..Default::default()
            });
            return Ok(replies);
        }

        let updates = diff(&state.tables, &working);
        state.tables = working;
        if let Some(len) = state.truncate_next.take() {
            replies.truncate(len);
        }

        let deliver = if updates.is_empty() {
            None
        } else if state.paused {
            state.held.push(updates);
            None
        } else {
            state.handler.clone().map(|handler| (handler, updates))
        };
        drop(state);

        if let Some((handler, updates)) = deliver {
            handler.update(&updates);
        }
        Ok(replies)
    }

    async fn monitor_all(
        &self,
        _database: &str,
        handler: Arc<dyn ChangeFeedHandler>,
    ) -> OvsdbResult<TableUpdates> {
        let mut state = self.state.lock();
        let initial = Self::snapshot(&state.tables);
        // under the lock: a commit racing this call is delivered after it
        handler.update(&initial);
        state.handler = Some(handler);
        Ok(initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{named_uuid, set, uuid};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn named_row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), json!(name));
        row
    }

    fn add_port_ops(name: &str) -> Vec<Operation> {
        let mut port = named_row(name);
        port.insert("interfaces".into(), named_uuid("intf"));
        vec![
            Operation::insert("Interface", named_row(name), Some("intf")),
            Operation::insert("Port", port, Some("port")),
            Operation::mutate(
                "Bridge",
                vec![Condition::equals("name", "ovs-br0")],
                vec![Mutation::new("ports", Mutator::Insert, set(vec![named_uuid("port")]))],
            ),
        ]
    }

    #[tokio::test]
    async fn test_named_uuids_resolve_within_transaction() {
        let db = InMemoryOvsdb::with_bridge("ovs-br0");
        let replies = db.transact("Open_vSwitch", &add_port_ops("p1")).await.unwrap();

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[2].count, Some(1));
        assert_eq!(db.bridge_ports("ovs-br0"), vec!["p1".to_string()]);

        let port = &db.rows_named("Port", "p1")[0];
        let intf_uuid = replies[0].inserted_uuid().unwrap();
        assert_eq!(port["interfaces"], uuid(intf_uuid));
    }

    #[tokio::test]
    async fn test_rejected_transaction_commits_nothing() {
        let db = InMemoryOvsdb::with_bridge("ovs-br0");
        let mut ops = add_port_ops("p1");
        ops.push(Operation::insert("Port", named_row("bad"), None));
        if let Operation::Insert { row, .. } = &mut ops[3] {
            row.insert("interfaces".into(), named_uuid("missing"));
        }

        let replies = db.transact("Open_vSwitch", &ops).await.unwrap();
        assert!(replies.last().unwrap().is_error());
        assert_eq!(db.count_named("Interface", "p1"), 0);
        assert!(db.bridge_ports("ovs-br0").is_empty());
    }

    #[tokio::test]
    async fn test_dangling_reference_is_rejected() {
        let db = InMemoryOvsdb::with_bridge("ovs-br0");
        db.transact("Open_vSwitch", &add_port_ops("p1")).await.unwrap();

        let replies = db
            .transact(
                "Open_vSwitch",
                &[Operation::delete("Port", vec![Condition::equals("name", "p1")])],
            )
            .await
            .unwrap();
        assert_eq!(
            replies.last().unwrap().error.as_deref(),
            Some("referential integrity violation")
        );
        assert_eq!(db.count_named("Port", "p1"), 1);
    }

    #[tokio::test]
    async fn test_feed_delivers_diffs_and_can_pause() {
        #[derive(Default)]
        struct Count(Mutex<Vec<TableUpdates>>);
        impl ChangeFeedHandler for Count {
            fn update(&self, updates: &TableUpdates) {
                self.0.lock().push(updates.clone());
            }
        }

        let db = InMemoryOvsdb::with_bridge("ovs-br0");
        let handler = Arc::new(Count::default());
        let initial = db.monitor_all("Open_vSwitch", handler.clone()).await.unwrap();
        assert_eq!(initial["Bridge"].len(), 1);
        // the snapshot is the first update the handler sees
        assert_eq!(handler.0.lock().clone(), vec![initial]);

        db.pause_feed();
        db.transact("Open_vSwitch", &add_port_ops("p1")).await.unwrap();
        assert_eq!(handler.0.lock().len(), 1);

        db.resume_feed();
        let seen = handler.0.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1]["Port"].len(), 1);
        assert_eq!(seen[1]["Interface"].len(), 1);
        assert!(seen[1]["Bridge"].values().all(|u| u.old.is_some()));
    }

    #[tokio::test]
    async fn test_uuid_condition() {
        let db = InMemoryOvsdb::new();
        let replies = db
            .transact(
                "Open_vSwitch",
                &[Operation::insert("Interface", named_row("p1"), None)],
            )
            .await
            .unwrap();
        let id = replies[0].inserted_uuid().unwrap().to_string();

        let replies = db
            .transact(
                "Open_vSwitch",
                &[Operation::delete(
                    "Interface",
                    vec![Condition::equals("_uuid", uuid(&id))],
                )],
            )
            .await
            .unwrap();
        assert_eq!(replies[0].count, Some(1));
        assert!(db.rows("Interface").is_empty());
        assert_eq!(db.transactions().len(), 2);
    }
}
