//! # Binder Provider Chain
//!
//! Capability lookup from a resolved coordinate to a live value.
//!
//! ## Overview
//!
//! - [`BinderProvider`] - decides, from the resource kind and declared target
//!   type alone, whether it can bind a parameter; unknown types are "no match"
//! - [`Binder`] - opens the resource and produces a [`BindResult`]
//! - [`ProviderChain`] - ordered providers, first match wins
//!
//! ## Default order
//!
//! | # | Provider | Binds |
//! |---|----------|-------|
//! | 1 | `blob-handle` | blob as raw handle |
//! | 2 | `blob-stream` | blob as byte reader / buffered writer |
//! | 3 | `blob-text-reader` | blob as buffered text reader |
//! | 4 | `blob-text-writer` | blob as buffered text writer |
//! | 5 | `blob-text` | blob as whole text or JSON, blob sets as arrays/sequences |
//! | 6 | `table-handle` | table with batched writes |
//! | 7 | `table-dictionary` | table as (partition, row) dictionary |
//! | 8 | `table-entity` | one entity with write-back |
//! | 9 | `queue-output` | queue output collector |
//! | 10 | `queue-trigger` | triggering queue message |
//! | 11 | `value` | config file content and ad-hoc values |
//! | 12 | `runtime-binder` | binder for requests decided at run time |
//!
//! Hosts append their own providers with [`ProviderChain::register`].

mod adhoc;
mod blob;
mod queue;
mod table;
mod value;

pub use adhoc::{RuntimeBinder, RuntimeBinderProvider};
pub use blob::{
    BlobHandleProvider, BlobStreamProvider, BlobTextProvider, BlobTextReaderProvider,
    BlobTextWriterProvider,
};
pub use queue::{QueueOutputProvider, QueueTriggerProvider};
pub use table::{TableDictionaryProvider, TableEntityProvider, TableHandleProvider};
pub use value::ValueProvider;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::bind_result::BindResult;
use crate::binding::{ResourceKind, RuntimeBinding, RuntimeBindingInputs};
use crate::error::JobHostError;
use crate::signature::{Direction, Parameter, TargetType};
use crate::storage::ResourceAccess;

// ============================================================================
// TRAITS
// ============================================================================

/// Opens the live resource for a resolved coordinate
///
/// `bind` is the only place a resource is opened. If it fails, nothing was
/// registered for cleanup: binders return before building their result.
pub trait Binder: Send + Sync {
    fn bind(
        &self,
        ctx: &BindContext,
        binding: &RuntimeBinding,
        parameter: &Parameter,
    ) -> Result<BindResult>;
}

/// Decides applicability from the resource kind and declared target only
pub trait BinderProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `None` for anything this provider does not recognize
    fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>>;
}

/// Per-invocation state a binder may need
#[derive(Clone)]
pub struct BindContext {
    pub access: Arc<dyn ResourceAccess>,
    pub chain: Arc<ProviderChain>,
    pub inputs: Arc<RuntimeBindingInputs>,
    /// Tokens captured from the function's blob-trigger pattern
    pub captures: Arc<HashMap<String, String>>,
}

impl BindContext {
    pub fn new(
        access: Arc<dyn ResourceAccess>,
        chain: Arc<ProviderChain>,
        inputs: Arc<RuntimeBindingInputs>,
    ) -> Self {
        Self {
            access,
            chain,
            inputs,
            captures: Arc::new(HashMap::new()),
        }
    }

    pub fn with_captures(mut self, captures: HashMap<String, String>) -> Self {
        self.captures = Arc::new(captures);
        self
    }

    pub fn connection(&self) -> &str {
        &self.inputs.connection
    }
}

impl fmt::Debug for BindContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindContext")
            .field("inputs", &self.inputs)
            .field("chain", &self.chain)
            .finish()
    }
}

// ============================================================================
// CHAIN
// ============================================================================

type LookupKey = (ResourceKind, TargetType, Direction);

/// Ordered registry of binder providers
///
/// Registration order is preserved and never deduplicated. Lookups are
/// memoized per (kind, target, direction); registering clears the memo.
#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn BinderProvider>>,
    cache: DashMap<LookupKey, Option<Arc<dyn Binder>>>,
}

impl ProviderChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain with the built-in providers in their default order
    pub fn with_defaults() -> Self {
        let mut chain = Self::new();
        chain.register(BlobHandleProvider);
        chain.register(BlobStreamProvider);
        chain.register(BlobTextReaderProvider);
        chain.register(BlobTextWriterProvider);
        chain.register(BlobTextProvider);
        chain.register(TableHandleProvider);
        chain.register(TableDictionaryProvider);
        chain.register(TableEntityProvider);
        chain.register(QueueOutputProvider);
        chain.register(QueueTriggerProvider);
        chain.register(ValueProvider);
        chain.register(RuntimeBinderProvider);
        chain
    }

    /// Append a provider at the end of the chain
    pub fn register(&mut self, provider: impl BinderProvider + 'static) {
        self.register_arc(Arc::new(provider));
    }

    pub fn register_arc(&mut self, provider: Arc<dyn BinderProvider>) {
        debug!(provider = provider.name(), position = self.providers.len(), "Registering binder provider");
        self.providers.push(provider);
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider names in registration order
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// First provider with a binder for this shape wins
    #[instrument(level = "debug", skip_all, fields(kind = %kind, target = %target, ?direction))]
    pub fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>> {
        let key = (kind, target.clone(), direction);
        if let Some(hit) = self.cache.get(&key) {
            return hit.value().clone();
        }
        // No shard lock held here: a provider may look up element binders on this chain
        let found = self.providers.iter().find_map(|provider| {
            let binder = provider.find_binder(kind, target, direction)?;
            debug!(provider = provider.name(), "Binder found");
            Some(binder)
        });
        self.cache.insert(key, found.clone());
        found
    }

    /// Find a binder and open the resource, attributing failures to the parameter
    pub fn bind(
        &self,
        ctx: &BindContext,
        binding: &RuntimeBinding,
        parameter: &Parameter,
    ) -> Result<BindResult, JobHostError> {
        let binder = self
            .find_binder(binding.kind(), &parameter.target, parameter.direction)
            .ok_or_else(|| JobHostError::NoBinder {
                parameter: parameter.name.clone(),
                kind: binding.kind().to_string(),
                target: parameter.target.to_string(),
            })?;
        binder
            .bind(ctx, binding, parameter)
            .map_err(|e| JobHostError::BindFailed {
                parameter: parameter.name.clone(),
                details: format!("{:#}", e),
            })
    }
}

impl Clone for ProviderChain {
    fn clone(&self) -> Self {
        Self {
            providers: self.providers.clone(),
            cache: DashMap::new(),
        }
    }
}

impl fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderChain")
            .field("providers", &self.provider_names())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
