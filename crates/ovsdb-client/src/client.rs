//! JSON-RPC 1.0 client over the database server's unix socket.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{OvsdbError, OvsdbResult};
use crate::protocol::{Operation, OperationResult, TableUpdates};
use crate::transport::{ChangeFeedHandler, OvsdbTransport};

/// Monitor id used for the full-database monitor.
const MONITOR_ID: &str = "ovsnet";

const READ_CHUNK: usize = 8192;

type Reply = OvsdbResult<Value>;
type Writer = Arc<AsyncMutex<OwnedWriteHalf>>;

/// State shared between callers and the reader task.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, (String, oneshot::Sender<Reply>)>>,
    handler: RwLock<Option<Arc<dyn ChangeFeedHandler>>>,
    closed: AtomicBool,
}

impl Shared {
    fn handler(&self) -> Option<Arc<dyn ChangeFeedHandler>> {
        self.handler.read().clone()
    }

    /// Fails every outstanding call and notifies the change-feed handler.
    fn close(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().collect()
        };
        for (_, (_, tx)) in drained {
            let _ = tx.send(Err(OvsdbError::Disconnected));
        }
        if let Some(handler) = self.handler() {
            handler.disconnected();
        }
    }

    async fn dispatch(&self, msg: Value, writer: &Writer) {
        match msg.get("method").and_then(Value::as_str) {
            Some("echo") => {
                let reply = json!({
                    "id": msg.get("id").cloned().unwrap_or(Value::Null),
                    "result": msg.get("params").cloned().unwrap_or_else(|| json!([])),
                    "error": Value::Null,
                });
                if let Err(e) = write_frame(writer, &reply).await {
                    warn!(error = %e, "Failed to answer echo request");
                }
                if let Some(handler) = self.handler() {
                    handler.echo();
                }
            }
            Some("update") => {
                let updates = msg
                    .get("params")
                    .and_then(|p| p.get(1))
                    .cloned()
                    .map(serde_json::from_value::<TableUpdates>);
                match (updates, self.handler()) {
                    (Some(Ok(updates)), Some(handler)) => handler.update(&updates),
                    (Some(Err(e)), _) => warn!(error = %e, "Discarding malformed update"),
                    _ => debug!("Update without handler or payload"),
                }
            }
            Some(method @ ("locked" | "stolen")) => {
                let lock_id = msg
                    .get("params")
                    .and_then(|p| p.get(0))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if let Some(handler) = self.handler() {
                    if method == "locked" {
                        handler.locked(lock_id);
                    } else {
                        handler.stolen(lock_id);
                    }
                }
            }
            Some(other) => debug!(method = other, "Ignoring unsolicited request"),
            None => self.complete(msg),
        }
    }

    fn complete(&self, msg: Value) {
        let Some(id) = msg.get("id").and_then(Value::as_u64) else {
            debug!("Dropping response with unknown id");
            return;
        };
        let Some((method, tx)) = self.pending.lock().remove(&id) else {
            debug!(id, "Dropping response for unknown request");
            return;
        };
        let reply = match msg.get("error") {
            Some(error) if !error.is_null() => Err(OvsdbError::Rpc {
                method,
                message: error.to_string(),
            }),
            _ if method == "monitor" => self.seed(msg.get("result")),
            _ => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = tx.send(reply);
    }

    /// Delivers the initial monitor contents from the reader task, ahead of
    /// any message that follows the reply.
    fn seed(&self, result: Option<&Value>) -> Reply {
        let result = result.cloned().unwrap_or(Value::Null);
        let initial: TableUpdates = serde_json::from_value(result.clone())?;
        if let Some(handler) = self.handler() {
            handler.update(&initial);
        }
        Ok(result)
    }
}

async fn write_frame(writer: &Writer, msg: &Value) -> OvsdbResult<()> {
    let mut frame = serde_json::to_vec(msg)?;
    frame.push(b'\n');
    let mut writer = writer.lock().await;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>, writer: Writer) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    'outer: loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                warn!(error = %e, "Switch database read failed");
                break;
            }
        }

        let mut messages = Vec::new();
        let mut consumed = 0;
        {
            let mut stream = serde_json::Deserializer::from_slice(&buf).into_iter::<Value>();
            loop {
                match stream.next() {
                    Some(Ok(msg)) => {
                        consumed = stream.byte_offset();
                        messages.push(msg);
                    }
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "Malformed message from switch database");
                        break 'outer;
                    }
                    None => {
                        consumed = stream.byte_offset();
                        break;
                    }
                }
            }
        }
        buf.drain(..consumed);

        for msg in messages {
            shared.dispatch(msg, &writer).await;
        }
    }

    info!("Switch database connection closed");
    shared.close();
}

/// A connection to the database server's local socket.
///
/// One reader task owns the receive half: it completes outstanding calls by
/// id, answers echo keepalives and forwards notifications to the registered
/// [`ChangeFeedHandler`].
pub struct UnixSocketClient {
    path: String,
    writer: Writer,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl UnixSocketClient {
    /// Connects to the socket at `path`.
    #[instrument]
    pub async fn connect(path: &str) -> OvsdbResult<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| OvsdbError::Connect {
                path: path.to_string(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();

        let writer: Writer = Arc::new(AsyncMutex::new(write_half));
        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_loop(read_half, shared.clone(), writer.clone()));

        info!(path, "Connected to switch database");
        Ok(Self {
            path: path.to_string(),
            writer,
            shared,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Returns the socket path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sends a request and waits for its response.
    async fn call(&self, method: &str, params: Value) -> OvsdbResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(OvsdbError::Disconnected);
            }
            pending.insert(id, (method.to_string(), tx));
        }

        let request = json!({ "method": method, "params": params, "id": id });
        if let Err(e) = write_frame(&self.writer, &request).await {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }
        debug!(method, id, "Request sent");

        rx.await.map_err(|_| OvsdbError::Disconnected)?
    }

    async fn table_names(&self, database: &str) -> OvsdbResult<Vec<String>> {
        let schema = self.call("get_schema", json!([database])).await?;
        let tables = schema
            .get("tables")
            .and_then(Value::as_object)
            .ok_or_else(|| OvsdbError::protocol("schema has no tables"))?;
        Ok(tables.keys().cloned().collect())
    }
}

impl Drop for UnixSocketClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl OvsdbTransport for UnixSocketClient {
    async fn transact(
        &self,
        database: &str,
        operations: &[Operation],
    ) -> OvsdbResult<Vec<OperationResult>> {
        let mut params = vec![json!(database)];
        params.extend(operations.iter().map(Operation::to_json));

        let result = self.call("transact", Value::Array(params)).await?;
        let replies: Vec<Option<OperationResult>> = serde_json::from_value(result)?;
        Ok(replies.into_iter().map(Option::unwrap_or_default).collect())
    }

    async fn monitor_all(
        &self,
        database: &str,
        handler: Arc<dyn ChangeFeedHandler>,
    ) -> OvsdbResult<TableUpdates> {
        let tables = self.table_names(database).await?;
        let requests: serde_json::Map<String, Value> =
            tables.into_iter().map(|t| (t, json!({}))).collect();

        *self.shared.handler.write() = Some(handler);
        let initial = self
            .call("monitor", json!([database, MONITOR_ID, requests]))
            .await?;
        Ok(serde_json::from_value(initial)?)
    }
}
