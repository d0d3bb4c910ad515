//! Registered function: signature plus its declarative binding requests

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::OnceCell;

use crate::binding::{BindingRequest, StaticBinding};
use crate::error::JobHostError;
use crate::signature::{FunctionSignature, Parameter};

/// A function's parameters and requests, with static bindings cached per parameter
///
/// Static resolution is pure, so a successful result is computed once and
/// reused by every invocation. Failures are not cached.
pub struct FunctionDescriptor {
    signature: FunctionSignature,
    requests: HashMap<String, BindingRequest>,
    statics: Vec<OnceCell<Option<StaticBinding>>>,
}

impl FunctionDescriptor {
    pub fn new(signature: FunctionSignature) -> Self {
        let statics = signature.parameters.iter().map(|_| OnceCell::new()).collect();
        Self {
            signature,
            requests: HashMap::new(),
            statics,
        }
    }

    /// Attach a request to the named parameter
    pub fn with_request(mut self, parameter: impl Into<String>, request: BindingRequest) -> Self {
        self.requests.insert(parameter.into(), request);
        self
    }

    pub fn with_requests(mut self, requests: HashMap<String, BindingRequest>) -> Self {
        self.requests.extend(requests);
        self
    }

    /// Requests keyed by parameter name, as YAML
    pub fn from_yaml(signature: FunctionSignature, yaml: &str) -> Result<Self, JobHostError> {
        let requests: HashMap<String, BindingRequest> = serde_yaml::from_str(yaml)?;
        Ok(Self::new(signature).with_requests(requests))
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.signature.parameters
    }

    pub fn request(&self, parameter: &str) -> Option<&BindingRequest> {
        self.requests.get(parameter)
    }

    /// Static binding of the parameter at `index`; `None` when it has no declarative binding
    pub fn static_binding(&self, index: usize) -> Result<Option<&StaticBinding>, JobHostError> {
        let (Some(parameter), Some(cell)) = (self.signature.parameters.get(index), self.statics.get(index))
        else {
            return Ok(None);
        };
        let binding =
            cell.get_or_try_init(|| StaticBinding::resolve(self.requests.get(&parameter.name), parameter))?;
        Ok(binding.as_ref())
    }

    /// Every static binding that resolves; failures are left for the binding pass
    pub(crate) fn resolvable_bindings(&self) -> Vec<&StaticBinding> {
        (0..self.signature.parameters.len())
            .filter_map(|index| self.static_binding(index).ok().flatten())
            .collect()
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("signature", &self.signature)
            .field("requests", &self.requests)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{Direction, TargetType};

    fn signature() -> FunctionSignature {
        FunctionSignature::new("copy")
            .with_parameter(Parameter::input("input", TargetType::Text))
            .with_parameter(Parameter::input("log", TargetType::Named("Logger".into())))
            .with_parameter(Parameter::output("outq", TargetType::QueueWriter))
    }

    #[test]
    fn resolves_and_caches_static_bindings() {
        let yaml = r#"
input: { type: blob, path: "input/{name}.txt" }
outq: { type: queue, direction: out }
"#;
        let descriptor = FunctionDescriptor::from_yaml(signature(), yaml).unwrap();

        let first = descriptor.static_binding(0).unwrap().cloned();
        let second = descriptor.static_binding(0).unwrap().cloned();
        assert_eq!(first, second);
        assert!(descriptor.static_binding(1).unwrap().is_none());
        assert!(matches!(
            descriptor.static_binding(2).unwrap(),
            Some(StaticBinding::Queue { queue, .. }) if queue == "outq"
        ));
        assert_eq!(descriptor.resolvable_bindings().len(), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let descriptor = FunctionDescriptor::new(signature())
            .with_request("input", BindingRequest::blob("Bad_Container/x.txt", Direction::In));
        assert!(descriptor.static_binding(0).is_err());
        assert!(descriptor.static_binding(0).is_err());
        assert!(descriptor.resolvable_bindings().is_empty());
    }
}
