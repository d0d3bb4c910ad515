//! Queue output collector

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;

use crate::storage::QueueStore;
use crate::watch::SelfWatch;

/// Messages added by the function, enqueued by the binding's post-action
#[derive(Clone, Default)]
pub struct QueueWriter {
    messages: Arc<Mutex<Vec<String>>>,
}

impl QueueWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, body: impl Into<String>) {
        self.messages.lock().push(body.into());
    }

    /// Serialize a value as a JSON message body
    pub fn add_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.add(serde_json::to_string(value)?);
        Ok(())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue everything collected so far, in order
    pub(crate) fn send_all(&self, store: &dyn QueueStore, queue: &str) -> Result<usize> {
        let messages = std::mem::take(&mut *self.messages.lock());
        for body in &messages {
            store.enqueue(queue, body)?;
        }
        Ok(messages.len())
    }

    pub fn watch(&self) -> QueueWatch {
        QueueWatch {
            messages: Arc::clone(&self.messages),
        }
    }
}

impl fmt::Debug for QueueWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueWriter")
            .field("pending", &self.len())
            .finish()
    }
}

pub struct QueueWatch {
    messages: Arc<Mutex<Vec<String>>>,
}

impl SelfWatch for QueueWatch {
    fn status(&self) -> String {
        format!("{} messages queued.", self.messages.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[test]
    fn sends_in_order() {
        let storage = MemoryStorage::new();
        let writer = QueueWriter::new();
        writer.add("first");
        writer.add_json(&json!({"n": 2})).unwrap();

        assert_eq!(writer.watch().status(), "2 messages queued.");
        assert_eq!(writer.send_all(&storage, "out").unwrap(), 2);
        assert_eq!(storage.messages("out"), vec!["first", r#"{"n":2}"#]);
        assert!(writer.is_empty());
    }
}
