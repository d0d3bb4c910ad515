//! # Invocation Orchestrator
//!
//! ```text
//! ResolvingBindings ──► Bound ──► Sampling+Invoking ──► Finalizing ──► Done
//!        │                                 │
//!        └─► FailedBinding                 └─► FailedInvocation
//!            (post for bound params)           (post for all, no success)
//! ```
//!
//! Parameters are bound strictly in declaration order. The function body
//! runs on the blocking pool so the sampler keeps ticking beside it.
//! Post-actions run for every bound parameter in declaration order whatever
//! the body did; success-actions only when it returned `Ok`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::bind_result::{panic_message, Arguments, BindResult, BoundValue, Lifecycle, Phase};
use crate::binding::{trigger_captures, BindingRequest, RuntimeBinding, RuntimeBindingInputs};
use crate::config::HostConfig;
use crate::error::JobHostError;
use crate::events::{EventKind, InvocationLog};
use crate::function::FunctionDescriptor;
use crate::provider::{BindContext, BinderProvider, ProviderChain};
use crate::sampler::{wrap_sequences, ProgressSink, SelfWatchSampler};
use crate::signature::{FunctionSignature, Parameter};
use crate::storage::ResourceAccess;
use crate::watch::SelfWatch;

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug)]
pub enum InvocationError {
    /// Resolution or open failure, attributed to a parameter
    Binding(JobHostError),
    /// The body's own error, unwrapped
    Function(anyhow::Error),
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationError::Binding(e) => write!(f, "{}", e),
            InvocationError::Function(e) => write!(f, "{:#}", e),
        }
    }
}

/// A post- or success-action failure; reported, never fails the invocation
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizationWarning {
    pub index: usize,
    pub name: String,
    pub phase: Phase,
    pub message: String,
}

#[derive(Debug)]
pub struct InvocationResult {
    pub success: bool,
    /// Final values of output-capable parameters, as seen by the body
    pub outputs: HashMap<String, Value>,
    pub return_value: Option<Value>,
    pub error: Option<InvocationError>,
    pub warnings: Vec<FinalizationWarning>,
    /// Last snapshot published by the sampler
    pub final_progress: Option<String>,
    pub events: InvocationLog,
}

impl InvocationResult {
    pub fn binding_error(&self) -> Option<&JobHostError> {
        match &self.error {
            Some(InvocationError::Binding(e)) => Some(e),
            _ => None,
        }
    }

    pub fn function_error(&self) -> Option<&anyhow::Error> {
        match &self.error {
            Some(InvocationError::Function(e)) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// HOST
// ============================================================================

/// Binds parameters and runs functions against one set of storage capabilities
#[derive(Clone)]
pub struct JobHost {
    config: HostConfig,
    chain: Arc<ProviderChain>,
    access: Arc<dyn ResourceAccess>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl JobHost {
    /// Host with the default provider chain and configuration
    pub fn new(access: Arc<dyn ResourceAccess>) -> Self {
        Self {
            config: HostConfig::default(),
            chain: Arc::new(ProviderChain::with_defaults()),
            access,
            progress: None,
        }
    }

    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Sink used by invocations that do not supply their own
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Append a provider to the end of the chain (host configuration time)
    pub fn register_provider(&mut self, provider: impl BinderProvider + 'static) {
        Arc::make_mut(&mut self.chain).register(provider);
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderChain {
        &self.chain
    }

    /// Build a descriptor for one call and invoke it
    pub async fn resolve_and_invoke<F>(
        &self,
        signature: FunctionSignature,
        requests: HashMap<String, BindingRequest>,
        inputs: RuntimeBindingInputs,
        body: F,
    ) -> InvocationResult
    where
        F: FnOnce(&mut Arguments) -> anyhow::Result<Option<Value>> + Send + 'static,
    {
        let descriptor = FunctionDescriptor::new(signature).with_requests(requests);
        self.invoke(&descriptor, inputs, body).await
    }

    pub async fn invoke<F>(
        &self,
        descriptor: &FunctionDescriptor,
        inputs: RuntimeBindingInputs,
        body: F,
    ) -> InvocationResult
    where
        F: FnOnce(&mut Arguments) -> anyhow::Result<Option<Value>> + Send + 'static,
    {
        self.invoke_with_progress(descriptor, inputs, self.progress.clone(), body)
            .await
    }

    /// Run one invocation; without a sink the sampler stays idle
    #[instrument(name = "invoke", skip_all, fields(function = %descriptor.name()))]
    pub async fn invoke_with_progress<F>(
        &self,
        descriptor: &FunctionDescriptor,
        mut inputs: RuntimeBindingInputs,
        progress: Option<Arc<dyn ProgressSink>>,
        body: F,
    ) -> InvocationResult
    where
        F: FnOnce(&mut Arguments) -> anyhow::Result<Option<Value>> + Send + 'static,
    {
        let log = InvocationLog::new();
        let parameters = descriptor.parameters();
        log.emit(EventKind::InvocationStarted {
            function: descriptor.name().into(),
            parameter_count: parameters.len(),
        });

        if inputs.connection.is_empty() {
            inputs.connection = self.config.connection.clone();
        }
        let captures = trigger_captures(descriptor.resolvable_bindings(), &inputs);
        let ctx = BindContext::new(Arc::clone(&self.access), Arc::clone(&self.chain), Arc::new(inputs))
            .with_captures(captures);

        // ResolvingBindings
        let mut values = Vec::with_capacity(parameters.len());
        let mut watchers: Vec<Option<Arc<dyn SelfWatch>>> = Vec::with_capacity(parameters.len());
        let mut lifecycles = Vec::with_capacity(parameters.len());
        for (index, parameter) in parameters.iter().enumerate() {
            match bind_parameter(descriptor, index, parameter, &ctx) {
                Ok(result) => {
                    let (value, watcher, lifecycle) = result.into_parts();
                    debug!(index, parameter = %parameter.name, kind = value.kind(), "Parameter bound");
                    log.emit(EventKind::ParameterBound {
                        index,
                        parameter: parameter.name.as_str().into(),
                        kind: value.kind().to_string(),
                    });
                    values.push(value);
                    watchers.push(watcher);
                    lifecycles.push(lifecycle);
                }
                Err(e) => {
                    let error = e.at_parameter(index, &parameter.name);
                    warn!(index, parameter = %parameter.name, error = %error, "Binding failed");
                    log.emit(EventKind::BindingFailed {
                        index,
                        parameter: parameter.name.as_str().into(),
                        error: error.to_string(),
                    });
                    // Already-opened resources are still released
                    let warnings = finalize(Phase::Post, &mut lifecycles, parameters, &log);
                    return complete(
                        &log,
                        InvocationResult {
                            success: false,
                            outputs: HashMap::new(),
                            return_value: None,
                            error: Some(InvocationError::Binding(error)),
                            warnings,
                            final_progress: None,
                            events: log.clone(),
                        },
                    );
                }
            }
        }

        // Sampling+Invoking
        if progress.is_some() {
            wrap_sequences(&mut values, &mut watchers);
        }
        let watched = watchers.iter().filter(|w| w.is_some()).count();
        let mut sampler = SelfWatchSampler::start(watchers, progress, self.config.sampler_config());
        log.emit(EventKind::FunctionStarted { watched });

        let names = parameters.iter().map(|p| p.name.clone()).collect();
        let args = Arguments::new(names, values);
        let started = log.elapsed_ms();
        let (outcome, values) = run_body(body, args).await;
        let duration_ms = log.elapsed_ms().saturating_sub(started);

        // Captured before the sampler stops, from the values the body saw
        let outputs = values
            .as_deref()
            .map(|values| collect_outputs(parameters, values))
            .unwrap_or_default();

        // Finalizing
        let final_progress = sampler.stop().await;
        if let Some(snapshot) = &final_progress {
            log.emit(EventKind::ProgressPublished {
                snapshot: snapshot.clone(),
            });
        }
        // Values (streams, readers) are closed before post-actions flush
        drop(values);

        let mut warnings = finalize(Phase::Post, &mut lifecycles, parameters, &log);
        let (success, return_value, error) = match outcome {
            Ok(return_value) => {
                info!(return_value = ?return_value, duration_ms, "Function completed");
                log.emit(EventKind::FunctionCompleted {
                    return_value: return_value.clone(),
                    duration_ms,
                });
                warnings.extend(finalize(Phase::Success, &mut lifecycles, parameters, &log));
                (true, return_value, None)
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), duration_ms, "Function failed");
                log.emit(EventKind::FunctionFailed {
                    error: format!("{:#}", e),
                    duration_ms,
                });
                (false, None, Some(InvocationError::Function(e)))
            }
        };

        complete(
            &log,
            InvocationResult {
                success,
                outputs,
                return_value,
                error,
                warnings,
                final_progress,
                events: log.clone(),
            },
        )
    }
}

impl fmt::Debug for JobHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHost")
            .field("config", &self.config)
            .field("chain", &self.chain)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

// ============================================================================
// STEPS
// ============================================================================

/// Static -> runtime -> provider chain for one parameter
fn bind_parameter(
    descriptor: &FunctionDescriptor,
    index: usize,
    parameter: &Parameter,
    ctx: &BindContext,
) -> Result<BindResult, JobHostError> {
    let binding = descriptor.static_binding(index)?;
    let runtime = RuntimeBinding::resolve_with_captures(binding, &ctx.inputs, &ctx.captures)?;
    ctx.chain.bind(ctx, &runtime, parameter)
}

/// Run the body on the blocking pool; a panic loses the arguments
async fn run_body<F>(body: F, mut args: Arguments) -> (anyhow::Result<Option<Value>>, Option<Vec<BoundValue>>)
where
    F: FnOnce(&mut Arguments) -> anyhow::Result<Option<Value>> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let outcome = body(&mut args);
        (outcome, args)
    });
    match handle.await {
        Ok((outcome, args)) => (outcome, Some(args.into_values())),
        Err(join) => {
            let message = if join.is_panic() {
                panic_message(&*join.into_panic())
            } else {
                join.to_string()
            };
            (Err(anyhow::Error::new(JobHostError::FunctionPanicked { message })), None)
        }
    }
}

fn collect_outputs(parameters: &[Parameter], values: &[BoundValue]) -> HashMap<String, Value> {
    parameters
        .iter()
        .zip(values)
        .filter(|(parameter, value)| parameter.is_output() || matches!(value, BoundValue::Slot(_)))
        .filter_map(|(parameter, value)| Some((parameter.name.clone(), value.snapshot()?)))
        .collect()
}

/// Run one phase for every lifecycle in declaration order, collecting failures
fn finalize(
    phase: Phase,
    lifecycles: &mut [Lifecycle],
    parameters: &[Parameter],
    log: &InvocationLog,
) -> Vec<FinalizationWarning> {
    let mut warnings = Vec::new();
    for (index, (lifecycle, parameter)) in lifecycles.iter_mut().zip(parameters).enumerate() {
        let errors = match phase {
            Phase::Post => lifecycle.run_post(),
            Phase::Success => lifecycle.run_success(),
        };
        for e in errors {
            let message = format!("{:#}", e);
            warn!(index, parameter = %parameter.name, %phase, error = %message, "Finalization failed");
            let name: Arc<str> = parameter.name.as_str().into();
            log.emit(match phase {
                Phase::Post => EventKind::PostActionFailed {
                    index,
                    parameter: name,
                    error: message.clone(),
                },
                Phase::Success => EventKind::SuccessActionFailed {
                    index,
                    parameter: name,
                    error: message.clone(),
                },
            });
            warnings.push(FinalizationWarning {
                index,
                name: parameter.name.clone(),
                phase,
                message,
            });
        }
    }
    warnings
}

fn complete(log: &InvocationLog, result: InvocationResult) -> InvocationResult {
    log.emit(EventKind::InvocationCompleted {
        success: result.success,
        duration_ms: log.elapsed_ms(),
        warnings: result.warnings.len(),
    });
    info!(success = result.success, warnings = result.warnings.len(), "Invocation completed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::TargetType;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn host(storage: &MemoryStorage) -> JobHost {
        JobHost::new(Arc::new(storage.clone()))
    }

    #[tokio::test]
    async fn return_value_and_outputs_are_reported() {
        let storage = MemoryStorage::new();
        storage.put_blob("input", "a.txt", "hi");
        let signature = FunctionSignature::new("shout")
            .with_parameter(Parameter::input("input", TargetType::Text))
            .with_parameter(Parameter::output("output", TargetType::Text));
        let descriptor = FunctionDescriptor::new(signature)
            .with_request("input", BindingRequest::blob("input/{name}.txt", crate::signature::Direction::In))
            .with_request("output", BindingRequest::blob("output/{name}.txt", crate::signature::Direction::Out));

        let result = host(&storage)
            .invoke(
                &descriptor,
                RuntimeBindingInputs::new("acct").with_name("name", "a"),
                |args| {
                    let text = args.text("input")?.to_uppercase();
                    args.slot("output")?.set(text);
                    Ok(Some(json!({"len": 2})))
                },
            )
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.return_value, Some(json!({"len": 2})));
        assert_eq!(result.outputs["output"], json!("HI"));
        assert_eq!(storage.blob_text("output", "a.txt").as_deref(), Some("HI"));
        assert!(result.final_progress.is_none());
        assert!(matches!(
            result.events.events().last().map(|e| e.kind.clone()),
            Some(EventKind::InvocationCompleted { success: true, warnings: 0, .. })
        ));
    }

    #[tokio::test]
    async fn panicking_body_still_finalizes() {
        let storage = MemoryStorage::new();
        let signature = FunctionSignature::new("boom")
            .with_parameter(Parameter::output("out", TargetType::QueueWriter));
        let descriptor = FunctionDescriptor::new(signature).with_request(
            "out",
            BindingRequest::queue(Some("results"), crate::signature::Direction::Out),
        );

        let result = host(&storage)
            .invoke(
                &descriptor,
                RuntimeBindingInputs::new("acct"),
                |args| {
                    args.queue("out")?.add("partial");
                    panic!("kaboom");
                },
            )
            .await;

        assert!(!result.success);
        let err = result.function_error().unwrap();
        assert!(matches!(
            err.downcast_ref::<JobHostError>(),
            Some(JobHostError::FunctionPanicked { message }) if message == "kaboom"
        ));
        assert_eq!(storage.messages("results"), vec!["partial"]);
        assert!(result.outputs.is_empty());
    }

    #[tokio::test]
    async fn empty_connection_falls_back_to_config() {
        let storage = MemoryStorage::new();
        storage.put_blob("input", "a.txt", "x");
        let config = HostConfig {
            connection: "Primary".into(),
            ..HostConfig::default()
        };
        let signature =
            FunctionSignature::new("read").with_parameter(Parameter::input("input", TargetType::Text));
        let descriptor = FunctionDescriptor::new(signature)
            .with_request("input", BindingRequest::blob("input/a.txt", crate::signature::Direction::In));

        let result = host(&storage)
            .with_config(config)
            .invoke(&descriptor, RuntimeBindingInputs::default(), |_| Ok(None))
            .await;

        assert!(result.success);
        assert_eq!(storage.connections(), vec!["Primary"]);
    }
}
