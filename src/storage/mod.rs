//! # Resource Access Capabilities
//!
//! Narrow interfaces to the storage backends. The host never speaks a wire
//! protocol: everything it opens goes through these traits, keyed by a
//! connection identity and a resource coordinate.
//!
//! - [`BlobStore`] - read, upload, delete and list blobs
//! - [`TableStore`] - point lookups, batched upserts, deletes, partition scans
//! - [`QueueStore`] - enqueue and delete messages
//! - [`ResourceAccess`] - resolves a connection identity to the three stores
//! - [`FileReader`] - reads files deployed next to the function
//!
//! [`MemoryStorage`] implements all of them for tests.

mod memory;

pub use memory::MemoryStorage;

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Properties of a table entity (excluding its keys)
pub type Entity = Map<String, Value>;

/// Blob metadata fetched at bind time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobProperties {
    pub length: u64,
}

/// One row returned by a partition scan
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    pub properties: Entity,
}

/// A message dequeued by the trigger listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    #[serde(default)]
    pub dequeue_count: u32,
    #[serde(default)]
    pub pop_receipt: Option<String>,
    #[serde(default)]
    pub insertion_time: Option<String>,
}

impl QueueMessage {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            dequeue_count: 1,
            pop_receipt: None,
            insertion_time: None,
        }
    }
}

pub trait BlobStore: Send + Sync {
    /// `None` when the blob does not exist
    fn properties(&self, container: &str, blob: &str) -> Result<Option<BlobProperties>>;

    fn open_read(&self, container: &str, blob: &str) -> Result<Box<dyn Read + Send>>;

    /// Atomic whole-object write
    fn upload(&self, container: &str, blob: &str, content: Vec<u8>) -> Result<()>;

    /// Returns whether the blob existed
    fn delete(&self, container: &str, blob: &str) -> Result<bool>;

    /// Blob names under `prefix`, sorted
    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>>;
}

pub trait TableStore: Send + Sync {
    fn lookup(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Option<Entity>>;

    /// Insert-or-replace rows sharing one partition key
    fn upsert_batch(&self, table: &str, partition_key: &str, rows: Vec<(String, Entity)>)
        -> Result<()>;

    /// Returns whether the row existed
    fn delete(&self, table: &str, partition_key: &str, row_key: &str) -> Result<bool>;

    fn scan(&self, table: &str, partition_key: Option<&str>) -> Result<Vec<TableRow>>;
}

pub trait QueueStore: Send + Sync {
    fn enqueue(&self, queue: &str, body: &str) -> Result<()>;

    fn delete(&self, queue: &str, message: &QueueMessage) -> Result<()>;
}

/// Resolves a connection identity to its stores
pub trait ResourceAccess: Send + Sync {
    fn blobs(&self, connection: &str) -> Result<Arc<dyn BlobStore>>;

    fn tables(&self, connection: &str) -> Result<Arc<dyn TableStore>>;

    fn queues(&self, connection: &str) -> Result<Arc<dyn QueueStore>>;
}

/// Reads a named file relative to the function's deployment location
pub trait FileReader: Send + Sync {
    fn read_to_string(&self, name: &str) -> Result<String>;
}

/// File reader rooted at a directory; rejects paths escaping the root
#[derive(Debug, Clone)]
pub struct DirectoryFileReader {
    root: PathBuf,
}

impl DirectoryFileReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileReader for DirectoryFileReader {
    fn read_to_string(&self, name: &str) -> Result<String> {
        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("'{}' is not a path inside the function directory", name);
        }
        let path = self.root.join(relative);
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_reader_reads_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), r#"{"retries": 3}"#).unwrap();

        let reader = DirectoryFileReader::new(dir.path());
        assert_eq!(
            reader.read_to_string("settings.json").unwrap(),
            r#"{"retries": 3}"#
        );
    }

    #[test]
    fn directory_reader_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let reader = DirectoryFileReader::new(dir.path());

        assert!(reader.read_to_string("../secrets").is_err());
        assert!(reader.read_to_string("/etc/passwd").is_err());
    }

    #[test]
    fn directory_reader_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let reader = DirectoryFileReader::new(dir.path());
        let err = reader.read_to_string("absent.json").unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn queue_message_from_json() {
        let msg: QueueMessage =
            serde_json::from_str(r#"{"id": "m1", "body": "hi", "dequeueCount": 2}"#).unwrap();
        assert_eq!(msg.dequeue_count, 2);
        assert_eq!(msg.pop_receipt, None);
    }
}
