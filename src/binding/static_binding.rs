//! Static resolution: request + parameter shape -> context-free descriptor
//!
//! One match arm per request variant. No I/O and no connection: the same
//! request and parameter always give the same `StaticBinding`, so the result
//! is cached per function and reused across invocations.

use serde_json::Value;

use super::path::BlobPath;
use super::request::BindingRequest;
use super::validate::{has_tokens, validate_queue_name, validate_table_name};
use crate::error::JobHostError;
use crate::signature::{Direction, Parameter, TargetType};

#[derive(Debug, Clone, PartialEq)]
pub enum StaticBinding {
    Blob {
        parameter: String,
        path: BlobPath,
        direction: Direction,
    },
    BlobTrigger {
        parameter: String,
        path: BlobPath,
    },
    BlobSet {
        parameter: String,
        path: BlobPath,
    },
    /// Output queue
    Queue {
        parameter: String,
        queue: String,
    },
    /// Message that triggered the invocation
    QueueTrigger {
        parameter: String,
        queue: String,
    },
    Table {
        parameter: String,
        table: String,
    },
    TableEntity {
        parameter: String,
        table: String,
        partition_key: String,
        row_key: String,
    },
    Config {
        parameter: String,
        filename: String,
    },
    AdHoc {
        parameter: String,
        value: Value,
    },
}

impl StaticBinding {
    /// `Ok(None)` means the parameter has no declarative binding
    pub fn resolve(
        request: Option<&BindingRequest>,
        parameter: &Parameter,
    ) -> Result<Option<Self>, JobHostError> {
        let Some(request) = request else {
            return Ok(None);
        };
        let name = parameter.name.clone();

        let binding = match request {
            BindingRequest::Blob { path, direction } => StaticBinding::Blob {
                parameter: name,
                path: BlobPath::parse(path)?,
                direction: *direction,
            },
            BindingRequest::BlobTrigger { path } => StaticBinding::BlobTrigger {
                parameter: name,
                path: BlobPath::parse(path)?,
            },
            BindingRequest::BlobSet { path } => {
                if !matches!(parameter.target, TargetType::Array(_) | TargetType::Sequence) {
                    return Err(shape_error(parameter, request));
                }
                StaticBinding::BlobSet {
                    parameter: name,
                    path: BlobPath::parse_prefix(path)?,
                }
            }
            BindingRequest::Queue {
                name: queue,
                direction,
            } => {
                // Default applied here and nowhere else
                let queue = queue.clone().unwrap_or_else(|| parameter.name.clone());
                if !has_tokens(&queue) {
                    validate_queue_name(&queue)?;
                }
                match direction {
                    Direction::In => StaticBinding::QueueTrigger {
                        parameter: name,
                        queue,
                    },
                    Direction::Out => StaticBinding::Queue {
                        parameter: name,
                        queue,
                    },
                }
            }
            BindingRequest::Table { name: table } => {
                if !has_tokens(table) {
                    validate_table_name(table)?;
                }
                StaticBinding::Table {
                    parameter: name,
                    table: table.clone(),
                }
            }
            BindingRequest::TableEntity {
                table,
                partition_key,
                row_key,
            } => {
                if !has_tokens(table) {
                    validate_table_name(table)?;
                }
                StaticBinding::TableEntity {
                    parameter: name,
                    table: table.clone(),
                    partition_key: partition_key.clone(),
                    row_key: row_key.clone(),
                }
            }
            BindingRequest::Config { filename } => StaticBinding::Config {
                filename: filename.clone().unwrap_or_else(|| parameter.name.clone()),
                parameter: name,
            },
            BindingRequest::AdHoc { value } => StaticBinding::AdHoc {
                parameter: name,
                value: value.clone(),
            },
            BindingRequest::Unknown => return Ok(None),
        };
        Ok(Some(binding))
    }

    pub fn parameter(&self) -> &str {
        match self {
            StaticBinding::Blob { parameter, .. }
            | StaticBinding::BlobTrigger { parameter, .. }
            | StaticBinding::BlobSet { parameter, .. }
            | StaticBinding::Queue { parameter, .. }
            | StaticBinding::QueueTrigger { parameter, .. }
            | StaticBinding::Table { parameter, .. }
            | StaticBinding::TableEntity { parameter, .. }
            | StaticBinding::Config { parameter, .. }
            | StaticBinding::AdHoc { parameter, .. } => parameter,
        }
    }
}

fn shape_error(parameter: &Parameter, request: &BindingRequest) -> JobHostError {
    JobHostError::InvalidBindingShape {
        parameter: parameter.name.clone(),
        target: parameter.target.to_string(),
        request: request.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(name: &str, target: TargetType) -> Parameter {
        Parameter::input(name, target)
    }

    #[test]
    fn no_request_is_not_a_binding() {
        let p = param("clock", TargetType::Named("Clock".into()));
        assert_eq!(StaticBinding::resolve(None, &p).unwrap(), None);
        assert_eq!(
            StaticBinding::resolve(Some(&BindingRequest::Unknown), &p).unwrap(),
            None
        );
    }

    #[test]
    fn resolution_is_pure() {
        let p = param("input", TargetType::Stream);
        let request = BindingRequest::blob("input/{name}.txt", Direction::In);
        let first = StaticBinding::resolve(Some(&request), &p).unwrap();
        let second = StaticBinding::resolve(Some(&request), &p).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn queue_name_defaults_to_parameter() {
        let p = Parameter::output("orders", TargetType::QueueWriter);
        let request = BindingRequest::queue(None, Direction::Out);
        let binding = StaticBinding::resolve(Some(&request), &p).unwrap().unwrap();
        assert_eq!(
            binding,
            StaticBinding::Queue {
                parameter: "orders".into(),
                queue: "orders".into()
            }
        );
    }

    #[test]
    fn inbound_queue_is_trigger_shaped() {
        let p = param("msg", TargetType::Json);
        let request = BindingRequest::queue(Some("incoming"), Direction::In);
        let binding = StaticBinding::resolve(Some(&request), &p).unwrap().unwrap();
        assert!(matches!(binding, StaticBinding::QueueTrigger { ref queue, .. } if queue == "incoming"));
        assert_eq!(binding.parameter(), "msg");
    }

    #[test]
    fn literal_names_are_validated() {
        let p = Parameter::output("Bad_Queue", TargetType::QueueWriter);
        let err = StaticBinding::resolve(Some(&BindingRequest::queue(None, Direction::Out)), &p)
            .unwrap_err();
        assert!(err.to_string().contains("JOB-011"));

        let p = param("rows", TargetType::TableHandle);
        assert!(StaticBinding::resolve(Some(&BindingRequest::table("1table")), &p).is_err());
        assert!(StaticBinding::resolve(Some(&BindingRequest::table("{tenant}Rows")), &p).is_ok());
    }

    #[test]
    fn blob_set_requires_collection_target() {
        let request = BindingRequest::blob_set("logs");
        let p = param("logs", TargetType::Text);
        let err = StaticBinding::resolve(Some(&request), &p).unwrap_err();
        assert!(err.to_string().contains("JOB-014"));

        let p = param("logs", TargetType::array_of(TargetType::Text));
        assert!(StaticBinding::resolve(Some(&request), &p).is_ok());
    }

    #[test]
    fn config_and_ad_hoc() {
        let p = param("settings", TargetType::Json);
        let binding = StaticBinding::resolve(Some(&BindingRequest::config(None)), &p)
            .unwrap()
            .unwrap();
        assert!(matches!(binding, StaticBinding::Config { ref filename, .. } if filename == "settings"));

        let binding = StaticBinding::resolve(Some(&BindingRequest::ad_hoc(json!(5))), &p)
            .unwrap()
            .unwrap();
        assert!(matches!(binding, StaticBinding::AdHoc { ref value, .. } if *value == json!(5)));
    }

    #[test]
    fn invalid_blob_path_fails_statically() {
        let p = param("input", TargetType::Stream);
        let request = BindingRequest::blob("no-blob-part", Direction::In);
        assert!(StaticBinding::resolve(Some(&request), &p).is_err());
    }
}
