//! Atomic transaction execution and connection bootstrap.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::cache::SwitchCache;
use crate::error::{OvsdbError, OvsdbResult};
use crate::protocol::{Operation, OperationResult};
use crate::transport::OvsdbTransport;

/// Runs operation sets as single transactions and validates the replies.
#[derive(Clone)]
pub struct TransactionExecutor {
    transport: Arc<dyn OvsdbTransport>,
    database: String,
}

impl TransactionExecutor {
    pub fn new(transport: Arc<dyn OvsdbTransport>, database: impl Into<String>) -> Self {
        Self {
            transport,
            database: database.into(),
        }
    }

    /// Returns the database name transactions are issued against.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Executes `ops` atomically.
    ///
    /// A short reply list is logged but not treated as a failure by itself.
    /// The first reply carrying an error fails the call with that reply's
    /// error and details; the database has then committed nothing.
    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    pub async fn execute(&self, ops: &[Operation]) -> OvsdbResult<Vec<OperationResult>> {
        let replies = self.transport.transact(&self.database, ops).await?;

        if replies.len() < ops.len() {
            warn!(
                expected = ops.len(),
                received = replies.len(),
                "Unexpected number of transaction replies"
            );
        }

        for (index, reply) in replies.iter().enumerate() {
            if let Some(error) = &reply.error {
                let details = reply.details.clone().unwrap_or_default();
                let op = ops.get(index).map_or("commit", Operation::op_name);
                warn!(index, op, %error, %details, "Transaction rejected");
                return Err(OvsdbError::transaction(index, error.clone(), details));
            }
        }

        debug!(replies = replies.len(), "Transaction committed");
        Ok(replies)
    }
}

/// A monitored switch database: the change-fed cache and the transaction
/// executor sharing one connection.
#[derive(Clone)]
pub struct SwitchDb {
    cache: Arc<SwitchCache>,
    executor: TransactionExecutor,
}

impl SwitchDb {
    /// Starts monitoring every table of `database`. The transport seeds the
    /// cache with the initial snapshot before delivering later changes.
    pub async fn open(
        transport: Arc<dyn OvsdbTransport>,
        database: impl Into<String>,
    ) -> OvsdbResult<Self> {
        let database = database.into();
        let cache = Arc::new(SwitchCache::new());

        let initial = transport.monitor_all(&database, cache.clone()).await?;
        debug!(
            database = %database,
            tables = initial.len(),
            "Switch database monitor established"
        );

        Ok(Self {
            cache,
            executor: TransactionExecutor::new(transport, database),
        })
    }

    pub fn cache(&self) -> &Arc<SwitchCache> {
        &self.cache
    }

    pub fn executor(&self) -> &TransactionExecutor {
        &self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOvsdb;
    use crate::protocol::{Condition, Row};
    use serde_json::json;

    fn interface_insert(name: &str) -> Operation {
        let mut row = Row::new();
        row.insert("name".into(), json!(name));
        Operation::insert("Interface", row, Some("intf"))
    }

    #[tokio::test]
    async fn test_execute_returns_replies() {
        let db = Arc::new(InMemoryOvsdb::new());
        let executor = TransactionExecutor::new(db.clone(), "Open_vSwitch");

        let replies = executor.execute(&[interface_insert("p1")]).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].inserted_uuid().is_some());
        assert_eq!(db.count_named("Interface", "p1"), 1);
    }

    #[tokio::test]
    async fn test_execute_surfaces_error_and_details() {
        let db = Arc::new(InMemoryOvsdb::new());
        db.fail_next_transaction("constraint violation", "duplicate port");
        let executor = TransactionExecutor::new(db.clone(), "Open_vSwitch");

        let err = executor
            .execute(&[interface_insert("p1")])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "constraint violation(duplicate port)");
        assert_eq!(db.count_named("Interface", "p1"), 0);
    }

    #[tokio::test]
    async fn test_execute_tolerates_short_reply() {
        let db = Arc::new(InMemoryOvsdb::new());
        db.truncate_next_reply(1);
        let executor = TransactionExecutor::new(db.clone(), "Open_vSwitch");

        let ops = [
            interface_insert("p1"),
            Operation::delete("Interface", vec![Condition::equals("name", "none")]),
        ];
        let replies = executor.execute(&ops).await.unwrap();
        assert_eq!(replies.len(), 1);
    }

    #[tokio::test]
    async fn test_open_seeds_cache_and_follows_feed() {
        let db = Arc::new(InMemoryOvsdb::with_bridge("ovs-br0"));
        let switch = SwitchDb::open(db.clone(), "Open_vSwitch").await.unwrap();
        assert!(switch.cache().find_uuid_by_name("Bridge", "ovs-br0").is_some());

        switch
            .executor()
            .execute(&[interface_insert("p1")])
            .await
            .unwrap();
        assert_eq!(switch.cache().count_named("Interface", "p1"), 1);
    }
}
