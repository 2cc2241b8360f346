//! Local row cache fed by the database monitor.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::protocol::{Row, TableUpdates};
use crate::tables::columns;
use crate::transport::ChangeFeedHandler;

/// Rows of every monitored table, keyed by table name then row uuid.
///
/// Only the change feed writes to the cache. Readers get owned snapshots so
/// the lock is never held beyond a single lookup.
#[derive(Debug, Default)]
pub struct SwitchCache {
    tables: RwLock<HashMap<String, HashMap<String, Row>>>,
}

impl SwitchCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch of row updates.
    ///
    /// A non-empty new value replaces the cached row; an empty or absent one
    /// removes it.
    pub fn apply_update(&self, updates: &TableUpdates) {
        let mut tables = self.tables.write();
        for (table, rows) in updates {
            let cached = tables.entry(table.clone()).or_default();
            for (uuid, update) in rows {
                match update.new_row() {
                    Some(row) => {
                        cached.insert(uuid.clone(), row.clone());
                    }
                    None => {
                        cached.remove(uuid);
                    }
                }
            }
            debug!(table = %table, rows = rows.len(), "Applied table update");
        }
    }

    /// Returns the uuid of the first row in `table` whose `name` column
    /// equals `name`.
    pub fn find_uuid_by_name(&self, table: &str, name: &str) -> Option<String> {
        let tables = self.tables.read();
        tables.get(table)?.iter().find_map(|(uuid, row)| {
            (row.get(columns::NAME).and_then(|v| v.as_str()) == Some(name)).then(|| uuid.clone())
        })
    }

    /// Returns a copy of a single row.
    pub fn row(&self, table: &str, uuid: &str) -> Option<Row> {
        self.tables.read().get(table)?.get(uuid).cloned()
    }

    /// Returns the number of rows in `table` named `name`.
    pub fn count_named(&self, table: &str, name: &str) -> usize {
        self.tables.read().get(table).map_or(0, |rows| {
            rows.values()
                .filter(|row| row.get(columns::NAME).and_then(|v| v.as_str()) == Some(name))
                .count()
        })
    }

    /// Returns the number of cached rows in `table`.
    pub fn table_len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, HashMap::len)
    }
}

impl ChangeFeedHandler for SwitchCache {
    fn update(&self, updates: &TableUpdates) {
        self.apply_update(updates);
    }

    fn disconnected(&self) {
        warn!("Switch database change feed disconnected, cache is now stale");
    }
}
