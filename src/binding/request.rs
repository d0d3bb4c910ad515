//! Declarative binding requests attached to parameters
//!
//! ```yaml
//! input:  { type: blob, path: "input/{name}.txt" }
//! output: { type: blob, path: "output/{name}.txt", direction: out }
//! msg:    { type: queue }                       # triggering message
//! rows:   { type: table, name: People }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::signature::Direction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BindingRequest {
    /// One blob by path pattern
    Blob {
        path: String,
        #[serde(default)]
        direction: Direction,
    },
    /// The blob whose arrival triggered the invocation
    BlobTrigger { path: String },
    /// Every blob under a container or prefix
    BlobSet { path: String },
    /// `in` binds the triggering message, `out` collects new messages.
    /// The queue name defaults to the parameter name.
    Queue {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        direction: Direction,
    },
    Table { name: String },
    #[serde(rename_all = "camelCase")]
    TableEntity {
        table: String,
        partition_key: String,
        row_key: String,
    },
    /// File deployed with the function; defaults to the parameter name
    Config {
        #[serde(default)]
        filename: Option<String>,
    },
    /// Value captured when the function was registered
    AdHoc { value: Value },
    /// Request kinds this host does not know
    #[serde(other)]
    Unknown,
}

impl BindingRequest {
    pub fn blob(path: impl Into<String>, direction: Direction) -> Self {
        BindingRequest::Blob {
            path: path.into(),
            direction,
        }
    }

    pub fn blob_trigger(path: impl Into<String>) -> Self {
        BindingRequest::BlobTrigger { path: path.into() }
    }

    pub fn blob_set(path: impl Into<String>) -> Self {
        BindingRequest::BlobSet { path: path.into() }
    }

    pub fn queue(name: Option<&str>, direction: Direction) -> Self {
        BindingRequest::Queue {
            name: name.map(str::to_string),
            direction,
        }
    }

    pub fn table(name: impl Into<String>) -> Self {
        BindingRequest::Table { name: name.into() }
    }

    pub fn table_entity(
        table: impl Into<String>,
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
    ) -> Self {
        BindingRequest::TableEntity {
            table: table.into(),
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }

    pub fn config(filename: Option<&str>) -> Self {
        BindingRequest::Config {
            filename: filename.map(str::to_string),
        }
    }

    pub fn ad_hoc(value: impl Into<Value>) -> Self {
        BindingRequest::AdHoc {
            value: value.into(),
        }
    }

    /// Short name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            BindingRequest::Blob { .. } => "blob",
            BindingRequest::BlobTrigger { .. } => "blob trigger",
            BindingRequest::BlobSet { .. } => "blob set",
            BindingRequest::Queue { .. } => "queue",
            BindingRequest::Table { .. } => "table",
            BindingRequest::TableEntity { .. } => "table entity",
            BindingRequest::Config { .. } => "config",
            BindingRequest::AdHoc { .. } => "ad-hoc",
            BindingRequest::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn requests_from_yaml() {
        let yaml = r#"
input: { type: blob, path: "input/{name}.txt" }
output: { type: blob, path: "output/{name}.txt", direction: out }
msg: { type: queue }
person: { type: tableEntity, table: People, partitionKey: p1, rowKey: "{id}" }
"#;
        let requests: HashMap<String, BindingRequest> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(
            requests["output"],
            BindingRequest::blob("output/{name}.txt", Direction::Out)
        );
        assert_eq!(requests["msg"], BindingRequest::queue(None, Direction::In));
        assert_eq!(
            requests["person"],
            BindingRequest::table_entity("People", "p1", "{id}")
        );
    }

    #[test]
    fn unknown_request_kind_is_kept() {
        let request: BindingRequest =
            serde_json::from_str(r#"{"type": "serviceBus", "topic": "x"}"#).unwrap();
        assert_eq!(request, BindingRequest::Unknown);
    }
}
