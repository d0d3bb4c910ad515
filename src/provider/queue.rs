//! Queue providers
//!
//! Output messages are enqueued by the post-action, so a failed function
//! still sends what it added. The triggering message is deleted by the
//! success-action only: failed invocations leave it for redelivery.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use super::{BindContext, Binder, BinderProvider};
use crate::bind_result::{BindResult, BoundValue, Slot};
use crate::binding::{ResourceKind, RuntimeBinding};
use crate::resources::QueueWriter;
use crate::signature::{Direction, Parameter, TargetType};
use crate::watch::StatusCell;

fn queue_name(binding: &RuntimeBinding) -> Result<&str> {
    match binding {
        RuntimeBinding::Queue { queue } => Ok(queue.as_str()),
        other => bail!("expected an output queue, got {}", other.kind()),
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

pub struct QueueOutputProvider;

struct QueueWriterBinder;
struct SingleMessageBinder;

impl BinderProvider for QueueOutputProvider {
    fn name(&self) -> &str {
        "queue-output"
    }

    fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>> {
        match (kind, target, direction) {
            (ResourceKind::Queue, TargetType::QueueWriter, _) => Some(Arc::new(QueueWriterBinder)),
            (ResourceKind::Queue, TargetType::Text | TargetType::Json, Direction::Out) => {
                Some(Arc::new(SingleMessageBinder))
            }
            _ => None,
        }
    }
}

impl Binder for QueueWriterBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let queue = queue_name(binding)?.to_string();
        let store = ctx.access.queues(ctx.connection())?;
        let writer = QueueWriter::new();
        let pending = writer.clone();
        Ok(BindResult::new(BoundValue::Queue(writer.clone()))
            .with_watcher(Arc::new(writer.watch()))
            .on_post_action(move || {
                pending.send_all(&*store, &queue)?;
                Ok(())
            }))
    }
}

impl Binder for SingleMessageBinder {
    /// One message, sent only if the function set it
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let queue = queue_name(binding)?.to_string();
        let store = ctx.access.queues(ctx.connection())?;
        let slot = Slot::default();
        let status = StatusCell::new("0 messages queued.");
        let (pending, watch_status) = (slot.clone(), Arc::clone(&status));
        Ok(BindResult::new(BoundValue::Slot(slot))
            .with_watcher(status)
            .on_post_action(move || {
                let body = match pending.get() {
                    None | Some(Value::Null) => return Ok(()),
                    Some(Value::String(text)) => text,
                    Some(other) => serde_json::to_string(&other)?,
                };
                store.enqueue(&queue, &body)?;
                watch_status.set("1 messages queued.");
                Ok(())
            }))
    }
}

// ============================================================================
// TRIGGER MESSAGE
// ============================================================================

pub struct QueueTriggerProvider;

struct TriggerMessageBinder;

impl BinderProvider for QueueTriggerProvider {
    fn name(&self) -> &str {
        "queue-trigger"
    }

    fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>> {
        match (kind, target, direction) {
            (ResourceKind::QueueMessage, TargetType::Text | TargetType::Json, Direction::In) => {
                Some(Arc::new(TriggerMessageBinder))
            }
            _ => None,
        }
    }
}

impl Binder for TriggerMessageBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, parameter: &Parameter) -> Result<BindResult> {
        let RuntimeBinding::QueueMessage { queue, message } = binding else {
            bail!("expected a queue message, got {}", binding.kind());
        };
        let value = match parameter.target {
            TargetType::Json => BoundValue::Json(
                serde_json::from_str(&message.body)
                    .with_context(|| format!("message {} is not valid JSON", message.id))?,
            ),
            _ => BoundValue::Text(message.body.clone()),
        };
        let store = ctx.access.queues(ctx.connection())?;
        let (queue, message) = (queue.clone(), message.clone());
        Ok(BindResult::new(value).on_success_action(move || store.delete(&queue, &message)))
    }
}
