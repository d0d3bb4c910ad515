//! Error types with fix suggestions
//!
//! Codes are grouped by the phase that raises them:
//! static resolution (JOB-01x), runtime resolution (JOB-02x),
//! binder lookup and open (JOB-03x), invocation (JOB-04x), configuration (JOB-05x).

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum JobHostError {
    // ─────────────────────────────────────────────────────────────
    // Static resolution (JOB-010 to JOB-014)
    // ─────────────────────────────────────────────────────────────

    #[error("JOB-010: Invalid blob path '{path}': {reason}")]
    InvalidBlobPath { path: String, reason: String },

    #[error("JOB-011: Invalid queue name '{name}': {reason}")]
    InvalidQueueName { name: String, reason: String },

    #[error("JOB-012: Invalid table name '{name}': {reason}")]
    InvalidTableName { name: String, reason: String },

    #[error("JOB-013: Invalid table key '{key}': {reason}")]
    InvalidTableKey { key: String, reason: String },

    #[error("JOB-014: Parameter '{parameter}' of type {target} cannot carry a {request} binding")]
    InvalidBindingShape {
        parameter: String,
        target: String,
        request: &'static str,
    },

    // ─────────────────────────────────────────────────────────────
    // Runtime resolution (JOB-020 to JOB-023)
    // ─────────────────────────────────────────────────────────────

    #[error("JOB-020: No value for token '{{{token}}}' in pattern '{pattern}'")]
    UnresolvedToken { token: String, pattern: String },

    #[error("JOB-021: Parameter '{parameter}' requires a {expected} trigger but none was supplied")]
    MissingTrigger {
        parameter: String,
        expected: &'static str,
    },

    #[error("JOB-022: Trigger '{actual}' does not match '{pattern}' for parameter '{parameter}'")]
    TriggerMismatch {
        parameter: String,
        pattern: String,
        actual: String,
    },

    #[error("JOB-023: Cannot read config file '{filename}': {details}")]
    ConfigFile { filename: String, details: String },

    // ─────────────────────────────────────────────────────────────
    // Binder lookup and open (JOB-030 to JOB-032)
    // ─────────────────────────────────────────────────────────────

    #[error("JOB-030: No binder for parameter '{parameter}' ({kind} as {target})")]
    NoBinder {
        parameter: String,
        kind: String,
        target: String,
    },

    #[error("JOB-031: Failed to open resource for '{parameter}': {details}")]
    BindFailed { parameter: String, details: String },

    #[error("JOB-032: Error while binding parameter #{index} '{name}': {source}")]
    BindingError {
        index: usize,
        name: String,
        #[source]
        source: Box<JobHostError>,
    },

    // ─────────────────────────────────────────────────────────────
    // Invocation (JOB-040)
    // ─────────────────────────────────────────────────────────────

    #[error("JOB-040: Function panicked: {message}")]
    FunctionPanicked { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration (JOB-050 to JOB-051)
    // ─────────────────────────────────────────────────────────────

    #[error("JOB-050: Host config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("JOB-051: Invalid host config field '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobHostError {
    /// Attribute a resolution or open failure to a parameter position
    pub fn at_parameter(self, index: usize, name: impl Into<String>) -> Self {
        JobHostError::BindingError {
            index,
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping parameter attribution
    pub fn root_cause(&self) -> &JobHostError {
        match self {
            JobHostError::BindingError { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl FixSuggestion for JobHostError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            JobHostError::InvalidBlobPath { .. } => {
                Some("Use 'container/blob' with a lowercase container name")
            }
            JobHostError::InvalidQueueName { .. } => {
                Some("Queue names are 3-63 lowercase letters, digits or single dashes")
            }
            JobHostError::InvalidTableName { .. } => {
                Some("Table names are 3-63 alphanumeric characters starting with a letter")
            }
            JobHostError::InvalidTableKey { .. } => {
                Some("Keys must be non-empty, shorter than 512 chars, without \\ / # ?")
            }
            JobHostError::InvalidBindingShape { .. } => {
                Some("Declare the parameter with a type the binding can produce")
            }
            JobHostError::UnresolvedToken { .. } => {
                Some("Supply the token in the name parameters or bind from a matching trigger")
            }
            JobHostError::MissingTrigger { .. } => {
                Some("Invoke the function from its trigger, or remove the trigger binding")
            }
            JobHostError::TriggerMismatch { .. } => {
                Some("Check the trigger path against the declared pattern")
            }
            JobHostError::ConfigFile { .. } => {
                Some("Deploy the config file next to the function")
            }
            JobHostError::NoBinder { .. } => {
                Some("Register a binder provider for this parameter type")
            }
            JobHostError::BindFailed { .. } => Some("Check the resource exists and is reachable"),
            JobHostError::BindingError { source, .. } => source.fix_suggestion(),
            JobHostError::FunctionPanicked { .. } => {
                Some("Return an error from the function instead of panicking")
            }
            JobHostError::ConfigParse(_) => Some("Check YAML syntax: indentation and quoting"),
            JobHostError::InvalidConfig { .. } => Some("Fix the value in the host config"),
            JobHostError::Io(_) => Some("Check file path and permissions"),
        }
    }
}
