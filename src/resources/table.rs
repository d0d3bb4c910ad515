//! Table values handed to functions
//!
//! Writes are batched per partition key: every batch sent to the store must
//! share one partition key, and small batches are the main cost of uploads.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::binding::validate_table_key;
use crate::storage::{Entity, TableRow, TableStore};
use crate::watch::SelfWatch;

/// Rows per upload batch (store limit is 100)
const UPLOAD_BATCH_SIZE: usize = 90;

/// Pending partitions kept before a forced flush
const PARTITION_CACHE_SIZE: usize = 10_000;

/// Row counters shared with the sampler
#[derive(Debug, Default)]
pub struct TableStats {
    read: AtomicU64,
    written: AtomicU64,
}

impl TableStats {
    fn record_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn rows_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl SelfWatch for TableStats {
    fn status(&self) -> String {
        let mut parts = Vec::new();
        let read = self.rows_read();
        let written = self.rows_written();
        if read > 0 {
            parts.push(format!("Read {} rows.", read));
        }
        if written > 0 {
            parts.push(format!("Wrote {} rows.", written));
        }
        if parts.is_empty() {
            return "No table activity.".to_string();
        }
        parts.join(" ")
    }
}

// ============================================================================
// TABLE CLIENT
// ============================================================================

struct ClientInner {
    store: Arc<dyn TableStore>,
    table: String,
    /// partition key -> rows waiting for upload
    pending: Mutex<HashMap<String, Vec<(String, Entity)>>>,
    stats: Arc<TableStats>,
}

/// Table handle with batched writes, flushed by the binding's post-action
#[derive(Clone)]
pub struct TableClient {
    inner: Arc<ClientInner>,
}

impl TableClient {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                store,
                table: table.into(),
                pending: Mutex::new(HashMap::new()),
                stats: Arc::new(TableStats::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.table
    }

    pub fn stats(&self) -> Arc<TableStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Queue a row for upload; later writes to the same key replace earlier ones
    pub fn write(&self, partition_key: &str, row_key: &str, entity: Entity) -> Result<()> {
        validate_table_key(partition_key)?;
        validate_table_key(row_key)?;
        self.inner.stats.record_write();

        let full_batch = {
            let mut pending = self.inner.pending.lock();
            if !pending.contains_key(partition_key) && pending.len() >= PARTITION_CACHE_SIZE {
                drop(pending);
                self.flush()?;
                pending = self.inner.pending.lock();
            }
            let batch = pending.entry(partition_key.to_string()).or_default();
            match batch.iter_mut().find(|(rk, _)| rk == row_key) {
                Some(existing) => existing.1 = entity,
                None => batch.push((row_key.to_string(), entity)),
            }
            if batch.len() >= UPLOAD_BATCH_SIZE {
                pending.remove(partition_key)
            } else {
                None
            }
        };

        if let Some(rows) = full_batch {
            self.inner
                .store
                .upsert_batch(&self.inner.table, partition_key, rows)?;
        }
        Ok(())
    }

    pub fn lookup(&self, partition_key: &str, row_key: &str) -> Result<Option<Entity>> {
        self.flush()?;
        self.inner.stats.record_read();
        self.inner
            .store
            .lookup(&self.inner.table, partition_key, row_key)
    }

    /// Rows of one partition, or the whole table
    pub fn scan(&self, partition_key: Option<&str>) -> Result<Vec<TableRow>> {
        self.flush()?;
        let rows = self.inner.store.scan(&self.inner.table, partition_key)?;
        for _ in &rows {
            self.inner.stats.record_read();
        }
        Ok(rows)
    }

    pub fn delete(&self, partition_key: &str, row_key: &str) -> Result<bool> {
        self.flush()?;
        self.inner
            .store
            .delete(&self.inner.table, partition_key, row_key)
    }

    /// Upload every pending batch
    pub fn flush(&self) -> Result<()> {
        let drained: Vec<(String, Vec<(String, Entity)>)> =
            self.inner.pending.lock().drain().collect();
        for (partition_key, rows) in drained {
            upload_partition(&*self.inner.store, &self.inner.table, &partition_key, rows)?;
        }
        Ok(())
    }

    pub fn pending_rows(&self) -> usize {
        self.inner.pending.lock().values().map(Vec::len).sum()
    }
}

impl fmt::Debug for TableClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableClient")
            .field("table", &self.inner.table)
            .field("pending", &self.pending_rows())
            .finish()
    }
}

fn upload_partition(
    store: &dyn TableStore,
    table: &str,
    partition_key: &str,
    rows: Vec<(String, Entity)>,
) -> Result<()> {
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let batch: Vec<_> = rows.by_ref().take(UPLOAD_BATCH_SIZE).collect();
        store.upsert_batch(table, partition_key, batch)?;
    }
    Ok(())
}

// ============================================================================
// TABLE DICTIONARY
// ============================================================================

type DictKey = (String, String);

struct DictInner {
    store: Arc<dyn TableStore>,
    table: String,
    pending: Mutex<BTreeMap<DictKey, Entity>>,
    stats: Arc<TableStats>,
}

/// Dictionary view of a table keyed by (partition, row)
///
/// Reads go to the store one key at a time; writes stay local until
/// [`TableDictionary::flush`], which the binding chains into its post-action.
#[derive(Clone)]
pub struct TableDictionary {
    inner: Arc<DictInner>,
}

impl TableDictionary {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DictInner {
                store,
                table: table.into(),
                pending: Mutex::new(BTreeMap::new()),
                stats: Arc::new(TableStats::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.table
    }

    pub fn stats(&self) -> Arc<TableStats> {
        Arc::clone(&self.inner.stats)
    }

    /// `None` means the key is absent, never a default-valued entity
    pub fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<Entity>> {
        let key = (partition_key.to_string(), row_key.to_string());
        if let Some(entity) = self.inner.pending.lock().get(&key) {
            return Ok(Some(entity.clone()));
        }
        self.inner.stats.record_read();
        self.inner
            .store
            .lookup(&self.inner.table, partition_key, row_key)
    }

    pub fn contains(&self, partition_key: &str, row_key: &str) -> Result<bool> {
        Ok(self.get(partition_key, row_key)?.is_some())
    }

    pub fn set(&self, partition_key: &str, row_key: &str, entity: Entity) -> Result<()> {
        validate_table_key(partition_key)?;
        validate_table_key(row_key)?;
        self.inner.stats.record_write();
        self.inner
            .pending
            .lock()
            .insert((partition_key.to_string(), row_key.to_string()), entity);
        Ok(())
    }

    /// Returns `true` only when an entity was actually removed
    pub fn remove(&self, partition_key: &str, row_key: &str) -> Result<bool> {
        let key = (partition_key.to_string(), row_key.to_string());
        let was_pending = self.inner.pending.lock().remove(&key).is_some();
        let was_stored = self
            .inner
            .store
            .delete(&self.inner.table, partition_key, row_key)?;
        Ok(was_pending || was_stored)
    }

    /// Upload pending writes, grouped by partition
    pub fn flush(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.inner.pending.lock());
        let mut by_partition: BTreeMap<String, Vec<(String, Entity)>> = BTreeMap::new();
        for ((partition_key, row_key), entity) in pending {
            by_partition
                .entry(partition_key)
                .or_default()
                .push((row_key, entity));
        }
        for (partition_key, rows) in by_partition {
            upload_partition(&*self.inner.store, &self.inner.table, &partition_key, rows)?;
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl fmt::Debug for TableDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDictionary")
            .field("table", &self.inner.table)
            .field("pending", &self.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn entity(value: i64) -> Entity {
        let mut e = Entity::new();
        e.insert("value".into(), json!(value));
        e
    }

    #[test]
    fn client_batches_until_flush() {
        let storage = MemoryStorage::new();
        let client = TableClient::new(Arc::new(storage.clone()), "scores");

        client.write("p1", "a", entity(1)).unwrap();
        client.write("p1", "b", entity(2)).unwrap();
        client.write("p2", "a", entity(3)).unwrap();
        assert_eq!(storage.row_count("scores"), 0);
        assert_eq!(client.pending_rows(), 3);

        client.flush().unwrap();
        assert_eq!(storage.row_count("scores"), 3);
        assert_eq!(storage.table_batches(), 2);
    }

    #[test]
    fn client_flushes_full_batch_early() {
        let storage = MemoryStorage::new();
        let client = TableClient::new(Arc::new(storage.clone()), "bulk");

        for i in 0..UPLOAD_BATCH_SIZE {
            client.write("p", &format!("r{}", i), entity(i as i64)).unwrap();
        }
        assert_eq!(storage.row_count("bulk"), UPLOAD_BATCH_SIZE);
        assert_eq!(client.pending_rows(), 0);
    }

    #[test]
    fn client_duplicate_key_in_batch_keeps_last() {
        let storage = MemoryStorage::new();
        let client = TableClient::new(Arc::new(storage.clone()), "dups");
        client.write("p", "r", entity(1)).unwrap();
        client.write("p", "r", entity(2)).unwrap();
        client.flush().unwrap();

        assert_eq!(storage.entity("dups", "p", "r"), Some(entity(2)));
    }

    #[test]
    fn client_rejects_bad_keys() {
        let client = TableClient::new(Arc::new(MemoryStorage::new()), "keys");
        assert!(client.write("", "r", entity(1)).is_err());
        assert!(client.write("p", "a/b", entity(1)).is_err());
    }

    #[test]
    fn client_status_reports_activity() {
        let storage = MemoryStorage::new();
        storage.put_entity("t", "p", "r", entity(1));
        let client = TableClient::new(Arc::new(storage), "t");
        let stats = client.stats();
        assert_eq!(stats.status(), "No table activity.");

        client.lookup("p", "r").unwrap();
        client.write("p", "s", entity(2)).unwrap();
        assert_eq!(stats.status(), "Read 1 rows. Wrote 1 rows.");
    }

    #[test]
    fn dictionary_get_distinguishes_missing() {
        let storage = MemoryStorage::new();
        storage.put_entity("kv", "p", "empty", Entity::new());
        let dict = TableDictionary::new(Arc::new(storage), "kv");

        assert_eq!(dict.get("p", "empty").unwrap(), Some(Entity::new()));
        assert_eq!(dict.get("p", "missing").unwrap(), None);
        assert!(dict.contains("p", "empty").unwrap());
        assert!(!dict.contains("p", "missing").unwrap());
    }

    #[test]
    fn dictionary_reads_own_pending_writes() {
        let storage = MemoryStorage::new();
        let dict = TableDictionary::new(Arc::new(storage.clone()), "kv");

        dict.set("p", "r", entity(7)).unwrap();
        assert_eq!(dict.get("p", "r").unwrap(), Some(entity(7)));
        assert_eq!(storage.entity("kv", "p", "r"), None);

        dict.flush().unwrap();
        assert_eq!(storage.entity("kv", "p", "r"), Some(entity(7)));
        assert_eq!(dict.pending_len(), 0);
    }

    #[test]
    fn dictionary_remove_reports_existence() {
        let storage = MemoryStorage::new();
        storage.put_entity("kv", "p", "stored", entity(1));
        let dict = TableDictionary::new(Arc::new(storage.clone()), "kv");

        assert!(dict.remove("p", "stored").unwrap());
        assert!(!dict.remove("p", "stored").unwrap());
        assert!(!dict.remove("p", "never").unwrap());

        dict.set("p", "local", entity(2)).unwrap();
        assert!(dict.remove("p", "local").unwrap());
        dict.flush().unwrap();
        assert_eq!(storage.entity("kv", "p", "local"), None);
    }

    #[test]
    fn dictionary_lookups_touch_single_keys() {
        let storage = MemoryStorage::new();
        for i in 0..50 {
            storage.put_entity("big", "p", &format!("r{}", i), entity(i));
        }
        let dict = TableDictionary::new(Arc::new(storage.clone()), "big");
        dict.get("p", "r3").unwrap();
        assert_eq!(storage.table_lookups(), 1);
    }
}
