//! Self-watch: point-in-time progress of a bound resource
//!
//! Watchers are read by the sampler task while the function body mutates
//! them, so every counter here is an atomic with a single writer.

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// Human-readable progress of one bound parameter
pub trait SelfWatch: Send + Sync {
    fn status(&self) -> String;
}

// ============================================================================
// BYTE COUNTERS
// ============================================================================

/// Counts bytes moved through a reader or writer
#[derive(Debug, Default)]
pub struct ByteCounter {
    bytes: AtomicU64,
}

impl ByteCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Watcher over a read stream whose length was fetched at bind time
pub struct ReadWatch {
    counter: Arc<ByteCounter>,
    total: u64,
}

impl ReadWatch {
    pub fn new(counter: Arc<ByteCounter>, total: u64) -> Self {
        Self { counter, total }
    }
}

impl SelfWatch for ReadWatch {
    fn status(&self) -> String {
        let read = self.counter.get();
        if self.total == 0 {
            return format!("Read {} bytes.", read);
        }
        let percent = read as f64 * 100.0 / self.total as f64;
        format!("Read {} bytes ({:.2}% of total)", read, percent)
    }
}

/// Watcher over a write stream
pub struct WriteWatch {
    counter: Arc<ByteCounter>,
}

impl WriteWatch {
    pub fn new(counter: Arc<ByteCounter>) -> Self {
        Self { counter }
    }
}

impl SelfWatch for WriteWatch {
    fn status(&self) -> String {
        format!("Wrote {} bytes.", self.counter.get())
    }
}

/// Reader that counts bytes as the function consumes them
pub struct CountingReader<R> {
    inner: R,
    counter: Arc<ByteCounter>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, counter: Arc<ByteCounter>) -> Self {
        Self { inner, counter }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n);
        Ok(n)
    }
}

// ============================================================================
// SEQUENCES
// ============================================================================

/// Lazily iterated sequence handed to a function
pub type Sequence = Box<dyn Iterator<Item = Value> + Send>;

/// Iterator wrapper counting every successful advance
pub struct CountingSequence {
    inner: Sequence,
    count: Arc<AtomicU64>,
}

impl CountingSequence {
    /// Wrap a sequence, returning the wrapper and its watcher
    pub fn wrap(inner: Sequence) -> (Self, SequenceWatch) {
        let count = Arc::new(AtomicU64::new(0));
        let watch = SequenceWatch {
            count: Arc::clone(&count),
        };
        (Self { inner, count }, watch)
    }
}

impl Iterator for CountingSequence {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let item = self.inner.next()?;
        self.count.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub struct SequenceWatch {
    count: Arc<AtomicU64>,
}

impl SequenceWatch {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl SelfWatch for SequenceWatch {
    fn status(&self) -> String {
        format!("Read {} items.", self.count())
    }
}

// ============================================================================
// MISC
// ============================================================================

/// Status set explicitly by a binder (e.g. after a post-action)
#[derive(Default)]
pub struct StatusCell {
    status: Mutex<String>,
}

impl StatusCell {
    pub fn new(initial: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(initial.into()),
        })
    }

    pub fn set(&self, status: impl Into<String>) {
        *self.status.lock() = status.into();
    }
}

impl SelfWatch for StatusCell {
    fn status(&self) -> String {
        self.status.lock().clone()
    }
}

/// Joins the statuses of an array binding's children
pub struct CompositeWatch {
    children: Vec<Arc<dyn SelfWatch>>,
}

impl CompositeWatch {
    pub fn new(children: Vec<Arc<dyn SelfWatch>>) -> Self {
        Self { children }
    }
}

impl SelfWatch for CompositeWatch {
    fn status(&self) -> String {
        self.children
            .iter()
            .map(|w| w.status())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
