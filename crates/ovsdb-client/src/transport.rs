//! Connection seam and change-feed callback.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::OvsdbResult;
use crate::protocol::{Operation, OperationResult, TableUpdates};

/// Receives asynchronous notifications from a monitored database.
///
/// Only [`update`](ChangeFeedHandler::update) is required; the remaining
/// events are accepted and ignored unless an implementation overrides them.
pub trait ChangeFeedHandler: Send + Sync {
    /// A batch of row changes committed by any client.
    fn update(&self, updates: &TableUpdates);

    /// A lock requested by this client was granted.
    fn locked(&self, _lock_id: &str) {}

    /// A lock held by this client was taken by another client.
    fn stolen(&self, _lock_id: &str) {}

    /// The server sent an echo (keepalive) request.
    fn echo(&self) {}

    /// The connection to the server was lost. No further updates follow.
    fn disconnected(&self) {}
}

/// A connection to a switch database.
#[async_trait]
pub trait OvsdbTransport: Send + Sync {
    /// Runs `operations` as one atomic transaction against `database`.
    ///
    /// Returns one result per executed operation. A server may return fewer
    /// results than operations, or an extra trailing result for a commit
    /// failure.
    async fn transact(
        &self,
        database: &str,
        operations: &[Operation],
    ) -> OvsdbResult<Vec<OperationResult>>;

    /// Monitors every column of every table of `database`.
    ///
    /// The handler is registered before the request is sent and receives
    /// the current contents as its first update, ahead of any change
    /// committed afterwards. The same contents are returned.
    async fn monitor_all(
        &self,
        database: &str,
        handler: Arc<dyn ChangeFeedHandler>,
    ) -> OvsdbResult<TableUpdates>;
}
