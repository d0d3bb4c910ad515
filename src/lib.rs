//! jobhost - parameter binding and invocation core for a function host

pub mod bind_result;
pub mod binding;
pub mod config;
pub mod error;
pub mod events;
pub mod function;
pub mod invoker;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod sampler;
pub mod signature;
pub mod storage;
pub mod watch;

pub use bind_result::{Arguments, BindResult, BoundValue, Lifecycle, Phase, Slot};
pub use binding::{
    BindingRequest, BlobPath, ResourceKind, RuntimeBinding, RuntimeBindingInputs, StaticBinding,
    TriggerPayload,
};
pub use config::HostConfig;
pub use error::{FixSuggestion, JobHostError};
pub use events::{Event, EventKind, InvocationLog};
pub use function::FunctionDescriptor;
pub use invoker::{FinalizationWarning, InvocationError, InvocationResult, JobHost};
pub use provider::{BindContext, Binder, BinderProvider, ProviderChain, RuntimeBinder};
pub use sampler::{MemorySink, ProgressSink, SamplerConfig, SelfWatchSampler};
pub use signature::{Direction, FunctionSignature, Parameter, TargetType};
pub use storage::{MemoryStorage, QueueMessage, ResourceAccess};
pub use watch::SelfWatch;
