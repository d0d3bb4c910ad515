//! Bind results and the two-phase lifecycle
//!
//! A [`BindResult`] is the live value for one parameter plus two optional
//! callbacks: the post-action (always runs once the body is done) and the
//! success-action (runs only after a successful body). Array results fan both
//! phases out to their children in declaration order.
//!
//! The value and the lifecycle are split by the orchestrator: values move into
//! the function body, lifecycles stay behind, so finalization still runs when
//! the body panics and its arguments are lost.

use std::any::Any;
use std::fmt;
use std::io::{BufRead, Read};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use serde_json::Value;

use crate::provider::RuntimeBinder;
use crate::resources::{BlobHandle, BlobWriter, QueueWriter, TableClient, TableDictionary};
use crate::watch::{CompositeWatch, SelfWatch, Sequence};

/// Lifecycle callback
pub type Action = Box<dyn FnOnce() -> Result<()> + Send>;

/// Finalization phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Post,
    Success,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Post => write!(f, "post"),
            Phase::Success => write!(f, "success"),
        }
    }
}

// ============================================================================
// SLOT
// ============================================================================

/// Shared cell for values the function hands back (text/JSON outputs, entities)
#[derive(Clone, Default)]
pub struct Slot {
    value: Arc<Mutex<Option<Value>>>,
}

impl Slot {
    pub fn new(initial: Option<Value>) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn set(&self, value: impl Into<Value>) {
        *self.value.lock() = Some(value.into());
    }

    pub fn clear(&self) {
        *self.value.lock() = None;
    }

    pub fn get(&self) -> Option<Value> {
        self.value.lock().clone()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&*self.value.lock()).finish()
    }
}

// ============================================================================
// BOUND VALUE
// ============================================================================

/// The live value passed to the function for one parameter
pub enum BoundValue {
    Empty,
    Text(String),
    Json(Value),
    Reader(Box<dyn Read + Send>),
    TextReader(Box<dyn BufRead + Send>),
    Writer(BlobWriter),
    Blob(BlobHandle),
    Table(TableClient),
    Dictionary(TableDictionary),
    Slot(Slot),
    Queue(QueueWriter),
    Sequence(Sequence),
    Binder(RuntimeBinder),
    Array(Vec<BoundValue>),
}

impl BoundValue {
    pub fn kind(&self) -> &'static str {
        match self {
            BoundValue::Empty => "empty",
            BoundValue::Text(_) => "text",
            BoundValue::Json(_) => "json",
            BoundValue::Reader(_) => "reader",
            BoundValue::TextReader(_) => "text reader",
            BoundValue::Writer(_) => "writer",
            BoundValue::Blob(_) => "blob handle",
            BoundValue::Table(_) => "table handle",
            BoundValue::Dictionary(_) => "table dictionary",
            BoundValue::Slot(_) => "slot",
            BoundValue::Queue(_) => "queue writer",
            BoundValue::Sequence(_) => "sequence",
            BoundValue::Binder(_) => "binder",
            BoundValue::Array(_) => "array",
        }
    }

    /// Explicit capability check replacing reflective type inspection
    pub fn is_sequence(&self) -> bool {
        matches!(self, BoundValue::Sequence(_))
    }

    /// Value reported for an output parameter, if the kind carries one
    pub fn snapshot(&self) -> Option<Value> {
        match self {
            BoundValue::Text(text) => Some(Value::String(text.clone())),
            BoundValue::Json(value) => Some(value.clone()),
            BoundValue::Slot(slot) => slot.get(),
            BoundValue::Writer(writer) => Some(Value::String(
                String::from_utf8_lossy(&writer.contents()).into_owned(),
            )),
            BoundValue::Queue(queue) => Some(Value::from(queue.messages())),
            BoundValue::Array(items) => {
                let values: Vec<Value> = items
                    .iter()
                    .map(|item| item.snapshot().unwrap_or(Value::Null))
                    .collect();
                Some(Value::Array(values))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundValue::Text(text) => f.debug_tuple("Text").field(text).finish(),
            BoundValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
            BoundValue::Array(items) => f.debug_tuple("Array").field(items).finish(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Post and success callbacks of one bind result, including array children
#[derive(Default)]
pub struct Lifecycle {
    post: Option<Action>,
    success: Option<Action>,
    children: Vec<Lifecycle>,
}

impl Lifecycle {
    /// Run every post-action once; failures are collected, never short-circuit
    pub fn run_post(&mut self) -> Vec<anyhow::Error> {
        let mut errors = Vec::new();
        self.run_phase(Phase::Post, &mut errors);
        errors
    }

    /// Run every success-action once; failures are collected, never short-circuit
    pub fn run_success(&mut self) -> Vec<anyhow::Error> {
        let mut errors = Vec::new();
        self.run_phase(Phase::Success, &mut errors);
        errors
    }

    fn run_phase(&mut self, phase: Phase, errors: &mut Vec<anyhow::Error>) {
        for child in &mut self.children {
            child.run_phase(phase, errors);
        }
        let action = match phase {
            Phase::Post => self.post.take(),
            Phase::Success => self.success.take(),
        };
        if let Some(action) = action {
            if let Err(e) = run_isolated(action) {
                errors.push(e);
            }
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("post", &self.post.is_some())
            .field("success", &self.success.is_some())
            .field("children", &self.children)
            .finish()
    }
}

fn run_isolated(action: Action) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(action)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("action panicked: {}", panic_message(&*payload))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================================
// BIND RESULT
// ============================================================================

pub struct BindResult {
    value: BoundValue,
    watcher: Option<Arc<dyn SelfWatch>>,
    lifecycle: Lifecycle,
}

impl BindResult {
    pub fn new(value: BoundValue) -> Self {
        Self {
            value,
            watcher: None,
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn with_watcher(mut self, watcher: Arc<dyn SelfWatch>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn on_post_action(mut self, action: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        self.lifecycle.post = Some(Box::new(action));
        self
    }

    pub fn on_success_action(
        mut self,
        action: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> Self {
        self.lifecycle.success = Some(Box::new(action));
        self
    }

    /// Composite result owning one child per element, in order
    pub fn array(children: Vec<BindResult>) -> Self {
        let mut values = Vec::with_capacity(children.len());
        let mut watchers = Vec::new();
        let mut lifecycles = Vec::with_capacity(children.len());
        for child in children {
            values.push(child.value);
            if let Some(watcher) = child.watcher {
                watchers.push(watcher);
            }
            lifecycles.push(child.lifecycle);
        }
        let watcher: Option<Arc<dyn SelfWatch>> = if watchers.is_empty() {
            None
        } else {
            Some(Arc::new(CompositeWatch::new(watchers)))
        };
        Self {
            value: BoundValue::Array(values),
            watcher,
            lifecycle: Lifecycle {
                post: None,
                success: None,
                children: lifecycles,
            },
        }
    }

    pub fn value(&self) -> &BoundValue {
        &self.value
    }

    pub fn watcher(&self) -> Option<&Arc<dyn SelfWatch>> {
        self.watcher.as_ref()
    }

    pub fn into_parts(self) -> (BoundValue, Option<Arc<dyn SelfWatch>>, Lifecycle) {
        (self.value, self.watcher, self.lifecycle)
    }
}

impl fmt::Debug for BindResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindResult")
            .field("value", &self.value)
            .field("watched", &self.watcher.is_some())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

// ============================================================================
// ARGUMENTS
// ============================================================================

/// Bound values as seen by the function body, addressed by parameter name
pub struct Arguments {
    names: Vec<String>,
    values: Vec<BoundValue>,
}

macro_rules! accessor {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&self, name: &str) -> Result<&$ty> {
            match self.lookup(name)? {
                BoundValue::$variant(inner) => Ok(inner),
                other => bail!("parameter '{}' is bound as {}, not {}", name, other.kind(), stringify!($name)),
            }
        }
    };
}

macro_rules! accessor_mut {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&mut self, name: &str) -> Result<&mut $ty> {
            match self.lookup_mut(name)? {
                BoundValue::$variant(inner) => Ok(inner),
                other => bail!("parameter '{}' is bound as {}, not {}", name, other.kind(), stringify!($name)),
            }
        }
    };
}

impl Arguments {
    pub(crate) fn new(names: Vec<String>, values: Vec<BoundValue>) -> Self {
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<&BoundValue> {
        let index = self.names.iter().position(|n| n == name)?;
        self.values.get(index)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BoundValue> {
        let index = self.names.iter().position(|n| n == name)?;
        self.values.get_mut(index)
    }

    fn lookup(&self, name: &str) -> Result<&BoundValue> {
        self.get(name)
            .ok_or_else(|| anyhow!("no parameter named '{}'", name))
    }

    fn lookup_mut(&mut self, name: &str) -> Result<&mut BoundValue> {
        self.get_mut(name)
            .ok_or_else(|| anyhow!("no parameter named '{}'", name))
    }

    /// Replace a bound value (e.g. assign a text output)
    pub fn set(&mut self, name: &str, value: BoundValue) -> Result<()> {
        *self.lookup_mut(name)? = value;
        Ok(())
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        match self.lookup(name)? {
            BoundValue::Text(text) => Ok(text.as_str()),
            other => bail!("parameter '{}' is bound as {}, not text", name, other.kind()),
        }
    }

    accessor!(json, Json, Value);
    accessor!(blob, Blob, BlobHandle);
    accessor!(table, Table, TableClient);
    accessor!(dictionary, Dictionary, TableDictionary);
    accessor!(slot, Slot, Slot);
    accessor!(queue, Queue, QueueWriter);
    accessor!(
        /// Runtime binder for requests decided inside the function
        binder, Binder, RuntimeBinder
    );
    accessor_mut!(writer, Writer, BlobWriter);
    accessor_mut!(sequence, Sequence, Sequence);
    accessor_mut!(array, Array, Vec<BoundValue>);

    pub fn reader(&mut self, name: &str) -> Result<&mut (dyn Read + Send)> {
        match self.lookup_mut(name)? {
            BoundValue::Reader(reader) => Ok(&mut **reader),
            other => bail!("parameter '{}' is bound as {}, not reader", name, other.kind()),
        }
    }

    pub fn text_reader(&mut self, name: &str) -> Result<&mut (dyn BufRead + Send)> {
        match self.lookup_mut(name)? {
            BoundValue::TextReader(reader) => Ok(&mut **reader),
            other => bail!("parameter '{}' is bound as {}, not text reader", name, other.kind()),
        }
    }

    pub(crate) fn into_values(self) -> Vec<BoundValue> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording(log: &Arc<Mutex<Vec<String>>>, label: &str) -> impl FnOnce() -> Result<()> + Send {
        let log = Arc::clone(log);
        let label = label.to_string();
        move || {
            log.lock().push(label);
            Ok(())
        }
    }

    #[test]
    fn post_and_success_run_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = BindResult::new(BoundValue::Empty)
            .on_post_action(recording(&log, "post"))
            .on_success_action(recording(&log, "success"));
        let (_, _, mut lifecycle) = result.into_parts();

        assert!(lifecycle.run_post().is_empty());
        assert!(lifecycle.run_post().is_empty());
        assert!(lifecycle.run_success().is_empty());
        assert_eq!(*log.lock(), vec!["post", "success"]);
    }

    #[test]
    fn array_fans_out_without_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let children = vec![
            BindResult::new(BoundValue::Empty).on_post_action(recording(&log, "a")),
            BindResult::new(BoundValue::Empty).on_post_action(|| bail!("b failed")),
            BindResult::new(BoundValue::Empty).on_post_action(|| panic!("c exploded")),
            BindResult::new(BoundValue::Empty).on_post_action(recording(&log, "d")),
        ];
        let (value, watcher, mut lifecycle) = BindResult::array(children).into_parts();

        assert!(matches!(value, BoundValue::Array(ref items) if items.len() == 4));
        assert!(watcher.is_none());

        let errors = lifecycle.run_post();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().contains("b failed"));
        assert!(errors[1].to_string().contains("c exploded"));
        assert_eq!(*log.lock(), vec!["a", "d"]);
    }

    #[test]
    fn array_joins_child_watchers() {
        use crate::watch::StatusCell;
        let children = vec![
            BindResult::new(BoundValue::Empty).with_watcher(StatusCell::new("one")),
            BindResult::new(BoundValue::Empty),
            BindResult::new(BoundValue::Empty).with_watcher(StatusCell::new("two")),
        ];
        let result = BindResult::array(children);
        assert_eq!(result.watcher().map(|w| w.status()).as_deref(), Some("one; two"));
    }

    #[test]
    fn arguments_typed_access() {
        let slot = Slot::default();
        let mut args = Arguments::new(
            vec!["name".into(), "out".into()],
            vec![BoundValue::Text("foo".into()), BoundValue::Slot(slot.clone())],
        );

        assert_eq!(args.text("name").unwrap(), "foo");
        args.slot("out").unwrap().set(json!({"ok": true}));
        assert_eq!(slot.get(), Some(json!({"ok": true})));

        let err = args.queue("name").unwrap_err();
        assert!(err.to_string().contains("bound as text"));
        assert!(args.text("missing").is_err());
        assert!(args.writer("out").is_err());
    }

    #[test]
    fn snapshot_reports_outputs() {
        assert_eq!(BoundValue::Text("x".into()).snapshot(), Some(json!("x")));
        assert_eq!(BoundValue::Empty.snapshot(), None);
        let queue = QueueWriter::new();
        queue.add("m1");
        assert_eq!(BoundValue::Queue(queue).snapshot(), Some(json!(["m1"])));
    }
}
