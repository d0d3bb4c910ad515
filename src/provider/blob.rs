//! Blob providers
//!
//! Reads fetch the blob length when binding so the byte counter can report a
//! percentage. Writes are buffered and uploaded once by the post-action.

use std::io::{BufReader, Read};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tracing::warn;

use super::{BindContext, Binder, BinderProvider};
use crate::bind_result::{BindResult, BoundValue, Slot};
use crate::binding::{ResourceKind, RuntimeBinding};
use crate::resources::{upload_buffer, BlobHandle, BlobWriter};
use crate::signature::{Direction, Parameter, TargetType};
use crate::storage::BlobStore;
use crate::watch::{ByteCounter, CountingReader, ReadWatch, Sequence, StatusCell, WriteWatch};

fn coordinate(binding: &RuntimeBinding) -> Result<(&str, &str)> {
    match binding {
        RuntimeBinding::Blob {
            container, blob, ..
        } => Ok((container.as_str(), blob.as_str())),
        other => bail!("expected a blob coordinate, got {}", other.kind()),
    }
}

/// Open a blob for reading, failing if it does not exist
fn open_counted(
    store: &dyn BlobStore,
    container: &str,
    blob: &str,
) -> Result<(CountingReader<Box<dyn Read + Send>>, ReadWatch)> {
    let properties = store
        .properties(container, blob)?
        .ok_or_else(|| anyhow!("blob {}/{} does not exist", container, blob))?;
    let counter = ByteCounter::new();
    let reader = CountingReader::new(store.open_read(container, blob)?, Arc::clone(&counter));
    Ok((reader, ReadWatch::new(counter, properties.length)))
}

/// Buffered writer whose post-action uploads to the blob
fn buffered_output(ctx: &BindContext, container: &str, blob: &str) -> Result<BindResult> {
    let store = ctx.access.blobs(ctx.connection())?;
    let counter = ByteCounter::new();
    let writer = BlobWriter::new(Arc::clone(&counter));
    let (container, blob) = (container.to_string(), blob.to_string());
    let pending = writer.clone();
    Ok(BindResult::new(BoundValue::Writer(writer))
        .with_watcher(Arc::new(WriteWatch::new(counter)))
        .on_post_action(move || upload_buffer(&*store, &container, &blob, &pending)))
}

// ============================================================================
// RAW HANDLE
// ============================================================================

pub struct BlobHandleProvider;

struct BlobHandleBinder;

impl BinderProvider for BlobHandleProvider {
    fn name(&self) -> &str {
        "blob-handle"
    }

    fn find_binder(&self, kind: ResourceKind, target: &TargetType, _: Direction) -> Option<Arc<dyn Binder>> {
        match (kind, target) {
            (ResourceKind::Blob, TargetType::BlobHandle) => Some(Arc::new(BlobHandleBinder)),
            _ => None,
        }
    }
}

impl Binder for BlobHandleBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let (container, blob) = coordinate(binding)?;
        let store = ctx.access.blobs(ctx.connection())?;
        Ok(BindResult::new(BoundValue::Blob(BlobHandle::new(store, container, blob))))
    }
}

// ============================================================================
// STREAM
// ============================================================================

pub struct BlobStreamProvider;

struct StreamReadBinder;
struct StreamWriteBinder;

impl BinderProvider for BlobStreamProvider {
    fn name(&self) -> &str {
        "blob-stream"
    }

    fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>> {
        match (kind, target, direction) {
            (ResourceKind::Blob, TargetType::Stream, Direction::In) => Some(Arc::new(StreamReadBinder)),
            (ResourceKind::Blob, TargetType::Stream, Direction::Out) => Some(Arc::new(StreamWriteBinder)),
            _ => None,
        }
    }
}

impl Binder for StreamReadBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let (container, blob) = coordinate(binding)?;
        let store = ctx.access.blobs(ctx.connection())?;
        let (reader, watch) = open_counted(&*store, container, blob)?;
        Ok(BindResult::new(BoundValue::Reader(Box::new(reader))).with_watcher(Arc::new(watch)))
    }
}

impl Binder for StreamWriteBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let (container, blob) = coordinate(binding)?;
        buffered_output(ctx, container, blob)
    }
}

// ============================================================================
// TEXT READER / WRITER
// ============================================================================

pub struct BlobTextReaderProvider;

struct TextReaderBinder;

impl BinderProvider for BlobTextReaderProvider {
    fn name(&self) -> &str {
        "blob-text-reader"
    }

    fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>> {
        match (kind, target, direction) {
            (ResourceKind::Blob, TargetType::TextReader, Direction::In) => Some(Arc::new(TextReaderBinder)),
            _ => None,
        }
    }
}

impl Binder for TextReaderBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let (container, blob) = coordinate(binding)?;
        let store = ctx.access.blobs(ctx.connection())?;
        let (reader, watch) = open_counted(&*store, container, blob)?;
        Ok(BindResult::new(BoundValue::TextReader(Box::new(BufReader::new(reader))))
            .with_watcher(Arc::new(watch)))
    }
}

pub struct BlobTextWriterProvider;

struct TextWriterBinder;

impl BinderProvider for BlobTextWriterProvider {
    fn name(&self) -> &str {
        "blob-text-writer"
    }

    fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>> {
        match (kind, target, direction) {
            (ResourceKind::Blob, TargetType::TextWriter, Direction::Out) => Some(Arc::new(TextWriterBinder)),
            _ => None,
        }
    }
}

impl Binder for TextWriterBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let (container, blob) = coordinate(binding)?;
        buffered_output(ctx, container, blob)
    }
}

// ============================================================================
// WHOLE TEXT / JSON, BLOB SETS
// ============================================================================

pub struct BlobTextProvider;

struct TextInBinder;
struct TextOutBinder;
struct BlobSetArrayBinder;
struct BlobSetSequenceBinder;

impl BinderProvider for BlobTextProvider {
    fn name(&self) -> &str {
        "blob-text"
    }

    fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>> {
        match (kind, target, direction) {
            (ResourceKind::Blob, TargetType::Text | TargetType::Json, Direction::In) => {
                Some(Arc::new(TextInBinder))
            }
            (ResourceKind::Blob, TargetType::Text | TargetType::Json, Direction::Out) => {
                Some(Arc::new(TextOutBinder))
            }
            (ResourceKind::BlobSet, TargetType::Array(_), _) => Some(Arc::new(BlobSetArrayBinder)),
            (ResourceKind::BlobSet, TargetType::Sequence, Direction::In) => {
                Some(Arc::new(BlobSetSequenceBinder))
            }
            _ => None,
        }
    }
}

fn read_all(store: &dyn BlobStore, container: &str, blob: &str) -> Result<(String, ReadWatch)> {
    let (mut reader, watch) = open_counted(store, container, blob)?;
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .with_context(|| format!("reading {}/{}", container, blob))?;
    Ok((content, watch))
}

impl Binder for TextInBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, parameter: &Parameter) -> Result<BindResult> {
        let (container, blob) = coordinate(binding)?;
        let store = ctx.access.blobs(ctx.connection())?;
        let (content, watch) = read_all(&*store, container, blob)?;
        let value = match parameter.target {
            TargetType::Json => BoundValue::Json(
                serde_json::from_str(&content)
                    .with_context(|| format!("{}/{} is not valid JSON", container, blob))?,
            ),
            _ => BoundValue::Text(content),
        };
        Ok(BindResult::new(value).with_watcher(Arc::new(watch)))
    }
}

impl Binder for TextOutBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let (container, blob) = coordinate(binding)?;
        let store = ctx.access.blobs(ctx.connection())?;
        let slot = Slot::default();
        let status = StatusCell::new("Nothing written.");
        let (pending, watch_status) = (slot.clone(), Arc::clone(&status));
        let (container, blob) = (container.to_string(), blob.to_string());

        Ok(BindResult::new(BoundValue::Slot(slot))
            .with_watcher(status)
            .on_post_action(move || {
                // Unset output means nothing to upload
                let Some(value) = pending.get() else {
                    return Ok(());
                };
                let content = match value {
                    Value::String(text) => text,
                    other => serde_json::to_string(&other)?,
                };
                let length = content.len();
                store.upload(&container, &blob, content.into_bytes())?;
                watch_status.set(format!("Wrote {} bytes.", length));
                Ok(())
            }))
    }
}

fn blob_set(binding: &RuntimeBinding) -> Result<(&str, &str)> {
    match binding {
        RuntimeBinding::BlobSet { container, prefix } => Ok((container.as_str(), prefix.as_str())),
        other => bail!("expected a blob set, got {}", other.kind()),
    }
}

impl Binder for BlobSetArrayBinder {
    /// One child per blob, bound through the chain with the element type
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, parameter: &Parameter) -> Result<BindResult> {
        let (container, prefix) = blob_set(binding)?;
        let TargetType::Array(element) = &parameter.target else {
            bail!("parameter '{}' is not an array", parameter.name);
        };
        let store = ctx.access.blobs(ctx.connection())?;
        let names = store.list(container, prefix)?;

        let mut children: Vec<BindResult> = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let child_param = Parameter {
                name: format!("{}[{}]", parameter.name, i),
                target: (**element).clone(),
                direction: parameter.direction,
            };
            let child_binding = RuntimeBinding::Blob {
                container: container.to_string(),
                blob: name.clone(),
                direction: parameter.direction,
            };
            match ctx.chain.bind(ctx, &child_binding, &child_param) {
                Ok(child) => children.push(child),
                Err(e) => {
                    // Release the children opened so far before failing
                    for child in children {
                        let (_, _, mut lifecycle) = child.into_parts();
                        for err in lifecycle.run_post() {
                            warn!(error = %err, "Post-action failed while releasing blob set");
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(BindResult::array(children))
    }
}

impl Binder for BlobSetSequenceBinder {
    /// Lazy: each blob is opened when the function advances to it
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let (container, prefix) = blob_set(binding)?;
        let store = ctx.access.blobs(ctx.connection())?;
        let names = store.list(container, prefix)?;
        let container = container.to_string();

        let items: Sequence = Box::new(names.into_iter().filter_map(move |name| {
            match read_all(&*store, &container, &name) {
                Ok((content, _)) => Some(json!({ "name": name, "content": content })),
                Err(e) => {
                    warn!(blob = %name, error = %e, "Skipping unreadable blob");
                    None
                }
            }
        }));
        Ok(BindResult::new(BoundValue::Sequence(items)))
    }
}
