//! Durable endpoint records.
//!
//! Every record carries the store index it was read or written at. Writes
//! and deletes are conditional on that index still being current, so two
//! writers never silently overwrite each other.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::{DriverError, Result};

/// Key prefix of endpoint records.
pub const ENDPOINT_KEY_PREFIX: &str = "ovs/endpoint";

/// Persisted form of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub id: String,
    /// Network id.
    pub nid: String,
    #[serde(rename = "intfName", default, skip_serializing_if = "String::is_empty")]
    pub intf_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Store index; 0 until the record has been written.
    #[serde(skip)]
    pub index: u64,
}

impl EndpointRecord {
    /// Returns the store key, `ovs/endpoint/<id>`.
    pub fn key(&self) -> String {
        format!("{}/{}", ENDPOINT_KEY_PREFIX, self.id)
    }

    /// Returns true once the record has been written to a store.
    pub fn exists(&self) -> bool {
        self.index != 0
    }
}

/// Key-value store holding endpoint records.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// Writes `record` if its index is still current (or if it is new and
    /// the key is free). Updates `record.index` on success.
    async fn put_atomic(&self, record: &mut EndpointRecord) -> Result<()>;

    /// Deletes `record` if its index is still current. Deleting a key that
    /// no longer exists succeeds.
    async fn delete_atomic(&self, record: &EndpointRecord) -> Result<()>;

    /// Returns every record whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<EndpointRecord>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    index: u64,
    value: EndpointRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct Entries(BTreeMap<String, StoredEntry>);

impl Entries {
    fn put(&mut self, record: &mut EndpointRecord) -> Result<()> {
        let key = record.key();
        let current = self.0.get(&key).map(|e| e.index);
        match current {
            None if record.index == 0 => {}
            Some(index) if index == record.index => {}
            _ => return Err(DriverError::StoreConflict { key }),
        }

        let index = current.unwrap_or(0) + 1;
        let mut value = record.clone();
        value.index = index;
        self.0.insert(key, StoredEntry { index, value });
        record.index = index;
        Ok(())
    }

    fn delete(&mut self, record: &EndpointRecord) -> Result<()> {
        let key = record.key();
        match self.0.get(&key) {
            None => {
                debug!(key = %key, "Record already deleted");
                Ok(())
            }
            Some(entry) if entry.index == record.index => {
                self.0.remove(&key);
                Ok(())
            }
            Some(_) => Err(DriverError::StoreConflict { key }),
        }
    }

    fn list(&self, prefix: &str) -> Vec<EndpointRecord> {
        self.0
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, entry)| {
                let mut record = entry.value.clone();
                record.index = entry.index;
                record
            })
            .collect()
    }
}

/// In-memory [`EndpointStore`].
#[derive(Debug, Default)]
pub struct MemoryEndpointStore {
    entries: Mutex<Entries>,
}

impl MemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.entries.lock().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EndpointStore for MemoryEndpointStore {
    async fn put_atomic(&self, record: &mut EndpointRecord) -> Result<()> {
        self.entries.lock().put(record)
    }

    async fn delete_atomic(&self, record: &EndpointRecord) -> Result<()> {
        self.entries.lock().delete(record)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<EndpointRecord>> {
        Ok(self.entries.lock().list(prefix))
    }
}

/// Writes `contents` to `path` through a synced temporary file and a rename,
/// then syncs the directory holding both.
fn write_durably(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    fs::File::open(dir)?.sync_all()
}

/// [`EndpointStore`] kept in a JSON file.
///
/// The whole file is rewritten on every change through a synced temporary
/// file and a rename, so a crash leaves either the old or the new contents.
/// Writes run on the blocking pool; the async lock keeps them in order.
#[derive(Debug)]
pub struct FileEndpointStore {
    path: PathBuf,
    entries: AsyncMutex<Entries>,
}

impl FileEndpointStore {
    /// Opens the store at `path`, loading existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                DriverError::store("open", format!("{}: {}", path.display(), e))
            })?;
            serde_json::from_str(&contents).map_err(|e| {
                DriverError::store("open", format!("{}: {}", path.display(), e))
            })?
        } else {
            Entries::default()
        };
        debug!(path = %path.display(), records = entries.0.len(), "Endpoint store opened");
        Ok(Self {
            path,
            entries: AsyncMutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &Entries, operation: &str) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| DriverError::store(operation, e.to_string()))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_durably(&path, &json))
            .await
            .map_err(|e| DriverError::store(operation, e.to_string()))?
            .map_err(|e| {
                warn!(path = %self.path.display(), error = %e, "Failed to write endpoint store");
                DriverError::store(operation, format!("{}: {}", self.path.display(), e))
            })
    }

    /// Applies `change` to a copy of the records and keeps it only if the
    /// file was written.
    async fn update<F>(&self, operation: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Entries) -> Result<()>,
    {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        change(&mut next)?;
        self.persist(&next, operation).await?;
        *entries = next;
        Ok(())
    }
}

#[async_trait]
impl EndpointStore for FileEndpointStore {
    async fn put_atomic(&self, record: &mut EndpointRecord) -> Result<()> {
        let mut written = record.clone();
        self.update("put", |entries| entries.put(&mut written))
            .await?;
        record.index = written.index;
        Ok(())
    }

    async fn delete_atomic(&self, record: &EndpointRecord) -> Result<()> {
        self.update("delete", |entries| entries.delete(record)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<EndpointRecord>> {
        Ok(self.entries.lock().await.list(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str) -> EndpointRecord {
        EndpointRecord {
            id: id.to_string(),
            nid: "net1".to_string(),
            intf_name: "port1a2b3c4".to_string(),
            addr: Some("10.0.0.5/24".to_string()),
            mac: Some("02:42:0a:00:00:05".to_string()),
            index: 0,
        }
    }

    #[test]
    fn test_record_json_format() {
        let value = serde_json::to_value(record("ep1")).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "ep1",
                "nid": "net1",
                "intfName": "port1a2b3c4",
                "addr": "10.0.0.5/24",
                "mac": "02:42:0a:00:00:05"
            })
        );

        let sparse: EndpointRecord =
            serde_json::from_value(json!({"id": "ep2", "nid": "net1"})).unwrap();
        assert_eq!(sparse.intf_name, "");
        assert_eq!(sparse.addr, None);
        assert_eq!(sparse.key(), "ovs/endpoint/ep2");
    }

    #[tokio::test]
    async fn test_put_assigns_index_and_detects_conflicts() {
        let store = MemoryEndpointStore::new();
        let mut rec = record("ep1");
        store.put_atomic(&mut rec).await.unwrap();
        assert!(rec.exists());

        // a second writer that never read the record
        let mut stale = record("ep1");
        let err = store.put_atomic(&mut stale).await.unwrap_err();
        assert!(matches!(err, DriverError::StoreConflict { .. }));

        // the owner can keep updating
        rec.mac = None;
        store.put_atomic(&mut rec).await.unwrap();
        assert_eq!(rec.index, 2);
    }

    #[tokio::test]
    async fn test_delete_requires_current_index() {
        let store = MemoryEndpointStore::new();
        let mut rec = record("ep1");
        store.put_atomic(&mut rec).await.unwrap();

        let mut old = rec.clone();
        old.index = 7;
        assert!(store.delete_atomic(&old).await.is_err());

        store.delete_atomic(&rec).await.unwrap();
        assert!(store.is_empty());
        // deleting again is fine
        store.delete_atomic(&rec).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryEndpointStore::new();
        for id in ["a", "b"] {
            store.put_atomic(&mut record(id)).await.unwrap();
        }
        let listed = store.list(ENDPOINT_KEY_PREFIX).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.index == 1));
        assert!(store.list("other/prefix").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("endpoints.json");

        let store = FileEndpointStore::open(&path).unwrap();
        let mut rec = record("ep1");
        store.put_atomic(&mut rec).await.unwrap();
        store.put_atomic(&mut record("ep2")).await.unwrap();
        store.delete_atomic(&rec).await.unwrap();
        drop(store);

        let reopened = FileEndpointStore::open(&path).unwrap();
        let listed = reopened.list(ENDPOINT_KEY_PREFIX).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "ep2");
        assert_eq!(listed[0].index, 1);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("endpoints.json");
        fs::write(&path, "not json").unwrap();

        let err = FileEndpointStore::open(&path).unwrap_err();
        assert!(matches!(err, DriverError::Store { .. }));
    }

    #[tokio::test]
    async fn test_file_store_failed_write_keeps_state() {
        let dir = TempDir::new().unwrap();
        // parent is a file, so the directory cannot be created
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = FileEndpointStore::open(blocker.join("endpoints.json")).unwrap();

        let mut rec = record("ep1");
        assert!(store.put_atomic(&mut rec).await.is_err());
        assert!(!rec.exists());
        assert!(store.list(ENDPOINT_KEY_PREFIX).await.unwrap().is_empty());
    }
}
