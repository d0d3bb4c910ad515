//! Function signatures: ordered parameter descriptors
//!
//! A signature is discovered once and is read-only to the host afterwards.
//! `TargetType` replaces runtime type inspection: binder providers match on it
//! explicitly instead of probing the declared type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether the function reads a parameter or may hand a value back through it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
}

/// Declared shape of a parameter value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetType {
    /// Raw byte stream (reader on input, buffered writer on output)
    Stream,
    /// Buffered text reader
    TextReader,
    /// Buffered text writer
    TextWriter,
    /// Whole content as a string
    Text,
    /// Whole content as JSON
    Json,
    /// Raw blob handle
    BlobHandle,
    /// Table handle with batched writes
    TableHandle,
    /// Dictionary adapter keyed by (partition, row)
    TableDictionary,
    /// Single table entity
    TableEntity,
    /// Queue output collector
    QueueWriter,
    /// Lazily iterated sequence of JSON items
    Sequence,
    /// Runtime binder capability
    Binder,
    /// One child value per matched resource
    Array(Box<TargetType>),
    /// Host-specific type handled by a custom provider
    Named(String),
}

impl TargetType {
    pub fn array_of(inner: TargetType) -> Self {
        TargetType::Array(Box::new(inner))
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Stream => write!(f, "stream"),
            TargetType::TextReader => write!(f, "text-reader"),
            TargetType::TextWriter => write!(f, "text-writer"),
            TargetType::Text => write!(f, "text"),
            TargetType::Json => write!(f, "json"),
            TargetType::BlobHandle => write!(f, "blob-handle"),
            TargetType::TableHandle => write!(f, "table-handle"),
            TargetType::TableDictionary => write!(f, "table-dictionary"),
            TargetType::TableEntity => write!(f, "table-entity"),
            TargetType::QueueWriter => write!(f, "queue-writer"),
            TargetType::Sequence => write!(f, "sequence"),
            TargetType::Binder => write!(f, "binder"),
            TargetType::Array(inner) => write!(f, "array<{}>", inner),
            TargetType::Named(name) => write!(f, "{}", name),
        }
    }
}

/// One parameter of a function signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub target: TargetType,
    #[serde(default)]
    pub direction: Direction,
}

impl Parameter {
    pub fn input(name: impl Into<String>, target: TargetType) -> Self {
        Self {
            name: name.into(),
            target,
            direction: Direction::In,
        }
    }

    pub fn output(name: impl Into<String>, target: TargetType) -> Self {
        Self {
            name: name.into(),
            target,
            direction: Direction::Out,
        }
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Out
    }
}

/// Ordered parameters of one function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub parameters: Vec<Parameter>,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter (declaration order is preserved)
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }
}
