//! Runtime resolution: static descriptor + invocation context -> concrete coordinate
//!
//! Tokens are filled from, in order of precedence:
//! 1. the trigger payload's well-known fields and the trigger pattern's captures
//! 2. the invocation's name parameters
//!
//! Nothing here opens a connection. The only read is a config binding's file,
//! done through the invocation's file capability.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::path::{apply_tokens, BlobPath};
use super::static_binding::StaticBinding;
use super::validate::{validate_queue_name, validate_table_key, validate_table_name};
use crate::error::JobHostError;
use crate::signature::Direction;
use crate::storage::{FileReader, QueueMessage};

// ============================================================================
// INPUTS
// ============================================================================

/// What caused the invocation
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerPayload {
    NewBlob { container: String, blob: String },
    NewQueueMessage { queue: String, message: QueueMessage },
}

impl TriggerPayload {
    pub fn new_blob(container: impl Into<String>, blob: impl Into<String>) -> Self {
        TriggerPayload::NewBlob {
            container: container.into(),
            blob: blob.into(),
        }
    }

    pub fn new_queue_message(queue: impl Into<String>, message: QueueMessage) -> Self {
        TriggerPayload::NewQueueMessage {
            queue: queue.into(),
            message,
        }
    }

    /// Well-known fields usable as path tokens
    pub fn fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        match self {
            TriggerPayload::NewBlob { container, blob } => {
                fields.insert("container".to_string(), container.clone());
                fields.insert("blob".to_string(), blob.clone());
                fields.insert("blobName".to_string(), blob_stem(blob).to_string());
            }
            TriggerPayload::NewQueueMessage { message, .. } => {
                // Body fields first so the fixed names below win
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&message.body) {
                    for (key, value) in map {
                        if let Some(scalar) = scalar_text(&value) {
                            fields.insert(key, scalar);
                        }
                    }
                }
                fields.insert("queueTrigger".to_string(), message.body.clone());
                fields.insert("id".to_string(), message.id.clone());
                fields.insert("dequeueCount".to_string(), message.dequeue_count.to_string());
                if let Some(time) = &message.insertion_time {
                    fields.insert("insertionTime".to_string(), time.clone());
                }
            }
        }
        fields
    }
}

/// File name without directories or extension
fn blob_stem(blob: &str) -> &str {
    let file = blob.rsplit('/').next().unwrap_or(blob);
    match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Per-invocation context, never mutated once built
#[derive(Clone, Default)]
pub struct RuntimeBindingInputs {
    pub connection: String,
    pub trigger: Option<TriggerPayload>,
    pub name_parameters: HashMap<String, String>,
    pub files: Option<Arc<dyn FileReader>>,
}

impl RuntimeBindingInputs {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            ..Self::default()
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerPayload) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.name_parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileReader>) -> Self {
        self.files = Some(files);
        self
    }

    /// Token values with trigger data taking precedence
    fn token_values(&self, captures: &HashMap<String, String>) -> HashMap<String, String> {
        let mut values = self.name_parameters.clone();
        if let Some(trigger) = &self.trigger {
            values.extend(trigger.fields());
        }
        values.extend(captures.iter().map(|(k, v)| (k.clone(), v.clone())));
        values
    }
}

impl fmt::Debug for RuntimeBindingInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBindingInputs")
            .field("connection", &self.connection)
            .field("trigger", &self.trigger)
            .field("name_parameters", &self.name_parameters)
            .field("files", &self.files.is_some())
            .finish()
    }
}

// ============================================================================
// RUNTIME BINDING
// ============================================================================

/// Resource category of a runtime binding, used for binder lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Blob,
    BlobSet,
    Queue,
    QueueMessage,
    Table,
    TableEntity,
    Config,
    Value,
    Unbound,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Blob => "blob",
            ResourceKind::BlobSet => "blob set",
            ResourceKind::Queue => "queue",
            ResourceKind::QueueMessage => "queue message",
            ResourceKind::Table => "table",
            ResourceKind::TableEntity => "table entity",
            ResourceKind::Config => "config file",
            ResourceKind::Value => "value",
            ResourceKind::Unbound => "unbound",
        };
        write!(f, "{}", name)
    }
}

/// Concrete resource coordinate for one parameter
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeBinding {
    Blob {
        container: String,
        blob: String,
        direction: Direction,
    },
    BlobSet {
        container: String,
        prefix: String,
    },
    Queue {
        queue: String,
    },
    QueueMessage {
        queue: String,
        message: QueueMessage,
    },
    Table {
        table: String,
    },
    TableEntity {
        table: String,
        partition_key: String,
        row_key: String,
    },
    /// Content of a file deployed with the function
    Config {
        filename: String,
        content: String,
    },
    /// Value captured when the function was registered
    Value {
        value: Value,
    },
    /// No declarative binding; left to ad-hoc binders
    Unbound,
}

impl RuntimeBinding {
    pub fn kind(&self) -> ResourceKind {
        match self {
            RuntimeBinding::Blob { .. } => ResourceKind::Blob,
            RuntimeBinding::BlobSet { .. } => ResourceKind::BlobSet,
            RuntimeBinding::Queue { .. } => ResourceKind::Queue,
            RuntimeBinding::QueueMessage { .. } => ResourceKind::QueueMessage,
            RuntimeBinding::Table { .. } => ResourceKind::Table,
            RuntimeBinding::TableEntity { .. } => ResourceKind::TableEntity,
            RuntimeBinding::Config { .. } => ResourceKind::Config,
            RuntimeBinding::Value { .. } => ResourceKind::Value,
            RuntimeBinding::Unbound => ResourceKind::Unbound,
        }
    }

    pub fn resolve(
        binding: Option<&StaticBinding>,
        inputs: &RuntimeBindingInputs,
    ) -> Result<Self, JobHostError> {
        Self::resolve_with_captures(binding, inputs, &HashMap::new())
    }

    /// Resolve with tokens captured from the function's blob-trigger pattern
    pub fn resolve_with_captures(
        binding: Option<&StaticBinding>,
        inputs: &RuntimeBindingInputs,
        captures: &HashMap<String, String>,
    ) -> Result<Self, JobHostError> {
        let Some(binding) = binding else {
            return Ok(RuntimeBinding::Unbound);
        };

        match binding {
            StaticBinding::Blob {
                path, direction, ..
            } => {
                let resolved = path.apply_names(&inputs.token_values(captures))?;
                Ok(RuntimeBinding::Blob {
                    container: resolved.container().to_string(),
                    blob: resolved.blob().to_string(),
                    direction: *direction,
                })
            }
            StaticBinding::BlobTrigger { parameter, path } => {
                let Some(TriggerPayload::NewBlob { container, blob }) = &inputs.trigger else {
                    return Err(JobHostError::MissingTrigger {
                        parameter: parameter.clone(),
                        expected: "new blob",
                    });
                };
                let actual = BlobPath::parse(&format!("{}/{}", container, blob))?;
                if path.match_path(&actual).is_none() {
                    return Err(JobHostError::TriggerMismatch {
                        parameter: parameter.clone(),
                        pattern: path.to_string(),
                        actual: actual.to_string(),
                    });
                }
                Ok(RuntimeBinding::Blob {
                    container: container.clone(),
                    blob: blob.clone(),
                    direction: Direction::In,
                })
            }
            StaticBinding::BlobSet { path, .. } => {
                let resolved = path.apply_names(&inputs.token_values(captures))?;
                Ok(RuntimeBinding::BlobSet {
                    container: resolved.container().to_string(),
                    prefix: resolved.blob().to_string(),
                })
            }
            StaticBinding::Queue { queue, .. } => {
                let queue = apply_tokens(queue, &inputs.token_values(captures))?;
                validate_queue_name(&queue)?;
                Ok(RuntimeBinding::Queue { queue })
            }
            StaticBinding::QueueTrigger { parameter, queue } => {
                let Some(TriggerPayload::NewQueueMessage {
                    queue: actual,
                    message,
                }) = &inputs.trigger
                else {
                    return Err(JobHostError::MissingTrigger {
                        parameter: parameter.clone(),
                        expected: "queue message",
                    });
                };
                let expected = apply_tokens(queue, &inputs.token_values(captures))?;
                if !expected.eq_ignore_ascii_case(actual) {
                    return Err(JobHostError::TriggerMismatch {
                        parameter: parameter.clone(),
                        pattern: expected,
                        actual: actual.clone(),
                    });
                }
                Ok(RuntimeBinding::QueueMessage {
                    queue: actual.clone(),
                    message: message.clone(),
                })
            }
            StaticBinding::Table { table, .. } => {
                let table = apply_tokens(table, &inputs.token_values(captures))?;
                validate_table_name(&table)?;
                Ok(RuntimeBinding::Table { table })
            }
            StaticBinding::TableEntity {
                table,
                partition_key,
                row_key,
                ..
            } => {
                let values = inputs.token_values(captures);
                let table = apply_tokens(table, &values)?;
                let partition_key = apply_tokens(partition_key, &values)?;
                let row_key = apply_tokens(row_key, &values)?;
                validate_table_name(&table)?;
                validate_table_key(&partition_key)?;
                validate_table_key(&row_key)?;
                Ok(RuntimeBinding::TableEntity {
                    table,
                    partition_key,
                    row_key,
                })
            }
            StaticBinding::Config { filename, .. } => {
                let files = inputs.files.as_ref().ok_or_else(|| JobHostError::ConfigFile {
                    filename: filename.clone(),
                    details: "no file reader for this invocation".into(),
                })?;
                let content = files
                    .read_to_string(filename)
                    .map_err(|e| JobHostError::ConfigFile {
                        filename: filename.clone(),
                        details: e.to_string(),
                    })?;
                Ok(RuntimeBinding::Config {
                    filename: filename.clone(),
                    content,
                })
            }
            StaticBinding::AdHoc { value, .. } => Ok(RuntimeBinding::Value {
                value: value.clone(),
            }),
        }
    }
}

/// Tokens captured by matching the trigger blob against the function's trigger pattern
pub fn trigger_captures<'a>(
    bindings: impl IntoIterator<Item = &'a StaticBinding>,
    inputs: &RuntimeBindingInputs,
) -> HashMap<String, String> {
    let Some(TriggerPayload::NewBlob { container, blob }) = &inputs.trigger else {
        return HashMap::new();
    };
    let Ok(actual) = BlobPath::parse(&format!("{}/{}", container, blob)) else {
        return HashMap::new();
    };
    bindings
        .into_iter()
        .find_map(|binding| match binding {
            StaticBinding::BlobTrigger { path, .. } => path.match_path(&actual),
            _ => None,
        })
        .unwrap_or_default()
}
