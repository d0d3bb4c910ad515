//! Binder handed to functions that decide their bindings at run time

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tracing::debug;

use super::{BindContext, Binder, BinderProvider};
use crate::bind_result::{BindResult, BoundValue, Lifecycle};
use crate::binding::{BindingRequest, ResourceKind, RuntimeBinding, StaticBinding};
use crate::signature::{Direction, Parameter, TargetType};

pub struct RuntimeBinderProvider;

struct RuntimeBinderBinder;

impl BinderProvider for RuntimeBinderProvider {
    fn name(&self) -> &str {
        "runtime-binder"
    }

    fn find_binder(&self, kind: ResourceKind, target: &TargetType, _: Direction) -> Option<Arc<dyn Binder>> {
        match (kind, target) {
            (ResourceKind::Unbound, TargetType::Binder) => Some(Arc::new(RuntimeBinderBinder)),
            _ => None,
        }
    }
}

impl Binder for RuntimeBinderBinder {
    fn bind(&self, ctx: &BindContext, _: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let binder = RuntimeBinder::new(ctx.clone());
        let (post, success) = (binder.clone(), binder.clone());
        Ok(BindResult::new(BoundValue::Binder(binder))
            .on_post_action(move || post.finalize(|l| l.run_post()))
            .on_success_action(move || success.finalize(|l| l.run_success())))
    }
}

/// Binds requests through the same resolvers and provider chain as declared parameters
///
/// Every lifecycle it collects is finalized by the owning parameter's
/// post and success actions, in the order the requests were bound.
#[derive(Clone)]
pub struct RuntimeBinder {
    ctx: BindContext,
    lifecycles: Arc<Mutex<Vec<Lifecycle>>>,
}

impl RuntimeBinder {
    fn new(ctx: BindContext) -> Self {
        Self {
            ctx,
            lifecycles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn bind(&self, request: &BindingRequest, parameter: Parameter) -> Result<BoundValue> {
        let binding = StaticBinding::resolve(Some(request), &parameter)?
            .ok_or_else(|| anyhow!("'{}' request cannot be bound at run time", request.kind()))?;
        let runtime =
            RuntimeBinding::resolve_with_captures(Some(&binding), &self.ctx.inputs, &self.ctx.captures)?;
        let (value, _, lifecycle) = self.ctx.chain.bind(&self.ctx, &runtime, &parameter)?.into_parts();
        debug!(parameter = %parameter.name, kind = %runtime.kind(), "Bound at run time");
        self.lifecycles.lock().push(lifecycle);
        Ok(value)
    }

    /// Number of results bound so far
    pub fn bound_count(&self) -> usize {
        self.lifecycles.lock().len()
    }

    fn finalize(&self, phase: impl Fn(&mut Lifecycle) -> Vec<anyhow::Error>) -> Result<()> {
        let mut lifecycles = self.lifecycles.lock();
        let errors: Vec<String> = lifecycles
            .iter_mut()
            .flat_map(|lifecycle| phase(lifecycle))
            .map(|e| format!("{:#}", e))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("{} runtime binding(s) failed: {}", errors.len(), errors.join("; ")))
        }
    }
}

impl fmt::Debug for RuntimeBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBinder")
            .field("bound", &self.bound_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::RuntimeBindingInputs;
    use crate::provider::ProviderChain;
    use crate::storage::MemoryStorage;

    fn binder(storage: &MemoryStorage, inputs: RuntimeBindingInputs) -> (RuntimeBinder, Lifecycle) {
        let ctx = BindContext::new(
            Arc::new(storage.clone()),
            Arc::new(ProviderChain::with_defaults()),
            Arc::new(inputs),
        );
        let (value, _, lifecycle) = ctx
            .chain
            .bind(&ctx, &RuntimeBinding::Unbound, &Parameter::input("binder", TargetType::Binder))
            .unwrap()
            .into_parts();
        let BoundValue::Binder(binder) = value else {
            panic!("expected runtime binder");
        };
        (binder, lifecycle)
    }

    #[test]
    fn binds_and_finalizes_runtime_requests() {
        let storage = MemoryStorage::new();
        storage.put_blob("input", "a.txt", "hello");
        let (binder, mut lifecycle) =
            binder(&storage, RuntimeBindingInputs::new("acct").with_name("name", "a"));

        let text = binder
            .bind(
                &BindingRequest::blob("input/{name}.txt", Direction::In),
                Parameter::input("in", TargetType::Text),
            )
            .unwrap();
        assert!(matches!(text, BoundValue::Text(ref t) if t == "hello"));

        let out = binder
            .bind(
                &BindingRequest::blob("output/{name}.txt", Direction::Out),
                Parameter::output("out", TargetType::Text),
            )
            .unwrap();
        let BoundValue::Slot(slot) = out else {
            panic!("expected slot");
        };
        slot.set("HELLO");
        assert_eq!(binder.bound_count(), 2);
        assert!(storage.blob_text("output", "a.txt").is_none());

        assert!(lifecycle.run_post().is_empty());
        assert_eq!(storage.blob_text("output", "a.txt").as_deref(), Some("HELLO"));
    }

    #[test]
    fn unresolved_tokens_fail_without_registering() {
        let storage = MemoryStorage::new();
        let (binder, _) = binder(&storage, RuntimeBindingInputs::new("acct"));
        let err = binder
            .bind(
                &BindingRequest::blob("input/{missing}.txt", Direction::In),
                Parameter::input("in", TargetType::Text),
            )
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert_eq!(binder.bound_count(), 0);
    }

    #[test]
    fn child_failures_surface_as_one_post_error() {
        let storage = MemoryStorage::new();
        storage.fail_uploads(true);
        let (binder, mut lifecycle) = binder(&storage, RuntimeBindingInputs::new("acct"));
        for name in ["one", "two"] {
            let value = binder
                .bind(
                    &BindingRequest::blob(&format!("output/{}.txt", name), Direction::Out),
                    Parameter::output(name, TargetType::Text),
                )
                .unwrap();
            if let BoundValue::Slot(slot) = value {
                slot.set(name);
            }
        }
        let errors = lifecycle.run_post();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().starts_with("2 runtime binding(s) failed"));
    }
}
