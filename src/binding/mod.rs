//! Binding Module - from declared request to concrete resource coordinate
//!
//! - `request`: declarative requests (BindingRequest)
//! - `static_binding`: context-free resolution (StaticBinding)
//! - `runtime`: per-invocation resolution (RuntimeBinding)
//! - `path`: blob path patterns and `{token}` substitution
//! - `validate`: resource name checks
//!
//! Data flow:
//! ```text
//! BindingRequest + Parameter
//!          ↓  StaticBinding::resolve  (pure, cached per function)
//!    StaticBinding
//!          ↓  RuntimeBinding::resolve (trigger + name parameters)
//!    RuntimeBinding
//!          ↓  ProviderChain::find_binder → Binder::bind
//!      BindResult
//! ```

mod path;
mod request;
mod runtime;
mod static_binding;
mod validate;

pub use path::{apply_tokens, token_names, BlobPath};
pub use request::BindingRequest;
pub use runtime::{
    trigger_captures, ResourceKind, RuntimeBinding, RuntimeBindingInputs, TriggerPayload,
};
pub use static_binding::StaticBinding;
pub use validate::{
    has_tokens, validate_container_name, validate_queue_name, validate_table_key,
    validate_table_name,
};
