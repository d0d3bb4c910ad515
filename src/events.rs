//! Invocation event log
//!
//! Per-invocation audit trail, owned by the orchestrator and returned with
//! the result.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: 10 variants across invocation, parameter and function levels
//! - InvocationLog: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in an invocation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID
    pub id: u64,
    /// Time since invocation start (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // INVOCATION LEVEL
    // ═══════════════════════════════════════════
    InvocationStarted {
        function: Arc<str>,
        parameter_count: usize,
    },
    InvocationCompleted {
        success: bool,
        duration_ms: u64,
        warnings: usize,
    },

    // ═══════════════════════════════════════════
    // PARAMETER LEVEL
    // ═══════════════════════════════════════════
    ParameterBound {
        index: usize,
        parameter: Arc<str>,
        kind: String,
    },
    BindingFailed {
        index: usize,
        parameter: Arc<str>,
        error: String,
    },
    PostActionFailed {
        index: usize,
        parameter: Arc<str>,
        error: String,
    },
    SuccessActionFailed {
        index: usize,
        parameter: Arc<str>,
        error: String,
    },

    // ═══════════════════════════════════════════
    // FUNCTION LEVEL
    // ═══════════════════════════════════════════
    FunctionStarted {
        watched: usize,
    },
    FunctionCompleted {
        return_value: Option<Value>,
        duration_ms: u64,
    },
    FunctionFailed {
        error: String,
        duration_ms: u64,
    },
    ProgressPublished {
        snapshot: String,
    },
}

impl EventKind {
    /// Parameter name if the event concerns one parameter
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::ParameterBound { parameter, .. }
            | Self::BindingFailed { parameter, .. }
            | Self::PostActionFailed { parameter, .. }
            | Self::SuccessActionFailed { parameter, .. } => Some(parameter),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::BindingFailed { .. }
                | Self::FunctionFailed { .. }
                | Self::PostActionFailed { .. }
                | Self::SuccessActionFailed { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct InvocationLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl InvocationLog {
    /// Create a log (call at invocation start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event, returning its ID
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.elapsed_ms(),
            kind,
        };
        self.events.write().push(event);
        id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events about one parameter
    pub fn filter_parameter(&self, name: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.parameter() == Some(name))
            .collect()
    }

    pub fn failures(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_failure())
            .collect()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InvocationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InvocationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationLog")
            .field("len", &self.len())
            .finish()
    }
}
