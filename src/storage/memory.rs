//! In-memory storage for testing
//!
//! Implements every storage capability without a backend and records the
//! operations it receives so tests can assert on them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;

use super::{
    BlobProperties, BlobStore, Entity, FileReader, QueueMessage, QueueStore, ResourceAccess,
    TableRow, TableStore,
};

type BlobKey = (String, String);
type RowKey = (String, String);

#[derive(Default)]
struct State {
    blobs: BTreeMap<BlobKey, Vec<u8>>,
    tables: HashMap<String, BTreeMap<RowKey, Entity>>,
    queues: HashMap<String, Vec<String>>,
    files: HashMap<String, String>,
    deleted_messages: Vec<(String, String)>,
    upload_log: Vec<String>,
    failing_opens: HashSet<BlobKey>,
    fail_uploads: bool,
    table_batches: usize,
    table_lookups: usize,
    connections: Vec<String>,
}

/// Shared in-memory account (cheap to clone, clones share state)
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────

    pub fn put_blob(&self, container: &str, blob: &str, content: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .blobs
            .insert((container.to_string(), blob.to_string()), content.into());
    }

    pub fn put_entity(&self, table: &str, partition_key: &str, row_key: &str, entity: Entity) {
        self.state
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert((partition_key.to_string(), row_key.to_string()), entity);
    }

    pub fn add_file(&self, name: &str, content: impl Into<String>) {
        self.state
            .lock()
            .files
            .insert(name.to_string(), content.into());
    }

    // ─────────────────────────────────────────────────────────────
    // Failure injection
    // ─────────────────────────────────────────────────────────────

    /// Make opening this blob fail
    pub fn fail_open(&self, container: &str, blob: &str) {
        self.state
            .lock()
            .failing_opens
            .insert((container.to_string(), blob.to_string()));
    }

    /// Make every upload fail
    pub fn fail_uploads(&self, fail: bool) {
        self.state.lock().fail_uploads = fail;
    }

    // ─────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────

    pub fn blob(&self, container: &str, blob: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .blobs
            .get(&(container.to_string(), blob.to_string()))
            .cloned()
    }

    pub fn blob_text(&self, container: &str, blob: &str) -> Option<String> {
        self.blob(container, blob)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    pub fn entity(&self, table: &str, partition_key: &str, row_key: &str) -> Option<Entity> {
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|t| t.get(&(partition_key.to_string(), row_key.to_string())))
            .cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state.lock().tables.get(table).map_or(0, |t| t.len())
    }

    /// Messages currently in a queue, oldest first
    pub fn messages(&self, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .queues
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// (queue, message id) pairs deleted so far
    pub fn deleted_messages(&self) -> Vec<(String, String)> {
        self.state.lock().deleted_messages.clone()
    }

    /// "container/blob" for every successful upload, in order
    pub fn upload_log(&self) -> Vec<String> {
        self.state.lock().upload_log.clone()
    }

    pub fn table_batches(&self) -> usize {
        self.state.lock().table_batches
    }

    pub fn table_lookups(&self) -> usize {
        self.state.lock().table_lookups
    }

    /// Connection identities the stores were requested for
    pub fn connections(&self) -> Vec<String> {
        self.state.lock().connections.clone()
    }
}

impl BlobStore for MemoryStorage {
    fn properties(&self, container: &str, blob: &str) -> Result<Option<BlobProperties>> {
        Ok(self.blob(container, blob).map(|b| BlobProperties {
            length: b.len() as u64,
        }))
    }

    fn open_read(&self, container: &str, blob: &str) -> Result<Box<dyn Read + Send>> {
        let state = self.state.lock();
        let key = (container.to_string(), blob.to_string());
        if state.failing_opens.contains(&key) {
            bail!("injected open failure for {}/{}", container, blob);
        }
        let content = state
            .blobs
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("blob {}/{} not found", container, blob))?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn upload(&self, container: &str, blob: &str, content: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_uploads {
            bail!("injected upload failure for {}/{}", container, blob);
        }
        state
            .blobs
            .insert((container.to_string(), blob.to_string()), content);
        state.upload_log.push(format!("{}/{}", container, blob));
        Ok(())
    }

    fn delete(&self, container: &str, blob: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .blobs
            .remove(&(container.to_string(), blob.to_string()))
            .is_some())
    }

    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .blobs
            .keys()
            .filter(|(c, b)| c == container && b.starts_with(prefix))
            .map(|(_, b)| b.clone())
            .collect())
    }
}

impl TableStore for MemoryStorage {
    fn lookup(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Option<Entity>> {
        let mut state = self.state.lock();
        state.table_lookups += 1;
        Ok(state
            .tables
            .get(table)
            .and_then(|t| t.get(&(partition_key.to_string(), row_key.to_string())))
            .cloned())
    }

    fn upsert_batch(
        &self,
        table: &str,
        partition_key: &str,
        rows: Vec<(String, Entity)>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.table_batches += 1;
        let rows_map = state.tables.entry(table.to_string()).or_default();
        for (row_key, entity) in rows {
            rows_map.insert((partition_key.to_string(), row_key), entity);
        }
        Ok(())
    }

    fn delete(&self, table: &str, partition_key: &str, row_key: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .tables
            .get_mut(table)
            .and_then(|t| t.remove(&(partition_key.to_string(), row_key.to_string())))
            .is_some())
    }

    fn scan(&self, table: &str, partition_key: Option<&str>) -> Result<Vec<TableRow>> {
        let state = self.state.lock();
        let Some(rows) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|((pk, _), _)| partition_key.map_or(true, |wanted| pk == wanted))
            .map(|((pk, rk), props)| TableRow {
                partition_key: pk.clone(),
                row_key: rk.clone(),
                properties: props.clone(),
            })
            .collect())
    }
}

impl QueueStore for MemoryStorage {
    fn enqueue(&self, queue: &str, body: &str) -> Result<()> {
        self.state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push(body.to_string());
        Ok(())
    }

    fn delete(&self, queue: &str, message: &QueueMessage) -> Result<()> {
        self.state
            .lock()
            .deleted_messages
            .push((queue.to_string(), message.id.clone()));
        Ok(())
    }
}

impl ResourceAccess for MemoryStorage {
    fn blobs(&self, connection: &str) -> Result<Arc<dyn BlobStore>> {
        self.state.lock().connections.push(connection.to_string());
        Ok(Arc::new(self.clone()))
    }

    fn tables(&self, connection: &str) -> Result<Arc<dyn TableStore>> {
        self.state.lock().connections.push(connection.to_string());
        Ok(Arc::new(self.clone()))
    }

    fn queues(&self, connection: &str) -> Result<Arc<dyn QueueStore>> {
        self.state.lock().connections.push(connection.to_string());
        Ok(Arc::new(self.clone()))
    }
}

impl FileReader for MemoryStorage {
    fn read_to_string(&self, name: &str) -> Result<String> {
        self.state
            .lock()
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("file '{}' not found", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blob_round_trip_and_listing() {
        let storage = MemoryStorage::new();
        storage.put_blob("input", "a/1.txt", "one");
        storage.put_blob("input", "a/2.txt", "two");
        storage.put_blob("input", "b/3.txt", "three");

        assert_eq!(storage.list("input", "a/").unwrap(), vec!["a/1.txt", "a/2.txt"]);
        assert_eq!(
            storage.properties("input", "b/3.txt").unwrap(),
            Some(BlobProperties { length: 5 })
        );
        assert_eq!(storage.properties("input", "missing").unwrap(), None);
    }

    #[test]
    fn injected_open_failure() {
        let storage = MemoryStorage::new();
        storage.put_blob("c", "b", "x");
        storage.fail_open("c", "b");
        assert!(storage.open_read("c", "b").is_err());
    }

    #[test]
    fn upload_is_logged_in_order() {
        let storage = MemoryStorage::new();
        storage.upload("out", "first", b"1".to_vec()).unwrap();
        storage.upload("out", "second", b"2".to_vec()).unwrap();
        assert_eq!(storage.upload_log(), vec!["out/first", "out/second"]);

        storage.fail_uploads(true);
        assert!(storage.upload("out", "third", Vec::new()).is_err());
        assert_eq!(storage.upload_log().len(), 2);
    }

    #[test]
    fn table_scan_filters_partition() {
        let storage = MemoryStorage::new();
        let mut entity = Entity::new();
        entity.insert("v".into(), json!(1));
        storage.put_entity("people", "p1", "r1", entity.clone());
        storage.put_entity("people", "p2", "r1", entity);

        assert_eq!(storage.scan("people", Some("p1")).unwrap().len(), 1);
        assert_eq!(storage.scan("people", None).unwrap().len(), 2);
        assert!(storage.scan("nothing", None).unwrap().is_empty());
    }
}
