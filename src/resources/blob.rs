//! Blob values handed to functions

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use crate::storage::BlobStore;
use crate::watch::ByteCounter;

/// Raw handle to one blob; every call goes to the store
#[derive(Clone)]
pub struct BlobHandle {
    store: Arc<dyn BlobStore>,
    container: String,
    blob: String,
}

impl BlobHandle {
    pub fn new(store: Arc<dyn BlobStore>, container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
            blob: blob.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.blob
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.container, self.blob)
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.store.properties(&self.container, &self.blob)?.is_some())
    }

    pub fn read_to_string(&self) -> Result<String> {
        let mut reader = self.store.open_read(&self.container, &self.blob)?;
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Ok(content)
    }

    pub fn upload(&self, content: impl Into<Vec<u8>>) -> Result<()> {
        self.store.upload(&self.container, &self.blob, content.into())
    }

    pub fn delete(&self) -> Result<bool> {
        self.store.delete(&self.container, &self.blob)
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("path", &self.path())
            .finish()
    }
}

/// Locally buffered blob writer
///
/// Object storage only takes whole-object writes, so the function writes into
/// a buffer that the binding's post-action uploads once. Clones share the buffer.
#[derive(Clone, Default)]
pub struct BlobWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
    counter: Arc<ByteCounter>,
}

impl BlobWriter {
    pub fn new(counter: Arc<ByteCounter>) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            counter,
        }
    }

    /// Take the buffered bytes, leaving the buffer empty
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Copy of the bytes written so far
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        self.counter.add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobWriter")
            .field("buffered", &self.len())
            .finish()
    }
}

/// Upload a writer's buffer to its blob
pub(crate) fn upload_buffer(
    store: &dyn BlobStore,
    container: &str,
    blob: &str,
    writer: &BlobWriter,
) -> Result<()> {
    let content = writer.take();
    store
        .upload(container, blob, content)
        .map_err(|e| anyhow!("uploading {}/{}: {}", container, blob, e))
}
