//! Live values handed to function bodies
//!
//! - [`BlobHandle`] / [`BlobWriter`] - raw blob access and buffered whole-object writes
//! - [`TableClient`] / [`TableDictionary`] - batched table access
//! - [`QueueWriter`] - deferred queue output

mod blob;
mod queue;
mod table;

pub use blob::{BlobHandle, BlobWriter};
pub(crate) use blob::upload_buffer;
pub use queue::{QueueWatch, QueueWriter};
pub use table::{TableClient, TableDictionary, TableStats};
