//! Config file content and ad-hoc values

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use super::{BindContext, Binder, BinderProvider};
use crate::bind_result::{BindResult, BoundValue};
use crate::binding::{ResourceKind, RuntimeBinding};
use crate::signature::{Direction, Parameter, TargetType};
use crate::watch::Sequence;

pub struct ValueProvider;

struct ValueBinder;

impl BinderProvider for ValueProvider {
    fn name(&self) -> &str {
        "value"
    }

    fn find_binder(
        &self,
        kind: ResourceKind,
        target: &TargetType,
        direction: Direction,
    ) -> Option<Arc<dyn Binder>> {
        match (kind, target, direction) {
            (
                ResourceKind::Config | ResourceKind::Value,
                TargetType::Text | TargetType::Json | TargetType::Sequence,
                Direction::In,
            ) => Some(Arc::new(ValueBinder)),
            _ => None,
        }
    }
}

impl Binder for ValueBinder {
    fn bind(&self, _: &BindContext, binding: &RuntimeBinding, parameter: &Parameter) -> Result<BindResult> {
        let value = match binding {
            RuntimeBinding::Config { filename, content } => {
                config_value(filename, content, &parameter.target)?
            }
            RuntimeBinding::Value { value } => ad_hoc_value(value, &parameter.target)?,
            other => bail!("expected a config file or value, got {}", other.kind()),
        };
        Ok(BindResult::new(value))
    }
}

fn config_value(filename: &str, content: &str, target: &TargetType) -> Result<BoundValue> {
    Ok(match target {
        TargetType::Json => BoundValue::Json(
            serde_json::from_str(content).with_context(|| format!("{} is not valid JSON", filename))?,
        ),
        TargetType::Sequence => match serde_json::from_str::<Value>(content) {
            Ok(Value::Array(items)) => BoundValue::Sequence(Box::new(items.into_iter())),
            // Anything else is read line by line
            _ => {
                let lines: Vec<Value> = content.lines().map(|l| Value::String(l.to_string())).collect();
                BoundValue::Sequence(Box::new(lines.into_iter()))
            }
        },
        _ => BoundValue::Text(content.to_string()),
    })
}

fn ad_hoc_value(value: &Value, target: &TargetType) -> Result<BoundValue> {
    Ok(match (target, value) {
        (TargetType::Text, Value::String(text)) => BoundValue::Text(text.clone()),
        (TargetType::Text, other) => BoundValue::Text(other.to_string()),
        (TargetType::Sequence, Value::Array(items)) => {
            let items: Sequence = Box::new(items.clone().into_iter());
            BoundValue::Sequence(items)
        }
        (TargetType::Sequence, other) => bail!("ad-hoc value {} is not a sequence", other),
        _ => BoundValue::Json(value.clone()),
    })
}
