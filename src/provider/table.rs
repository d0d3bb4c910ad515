//! Table providers

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::Value;

use super::{BindContext, Binder, BinderProvider};
use crate::bind_result::{BindResult, BoundValue, Slot};
use crate::binding::{ResourceKind, RuntimeBinding};
use crate::resources::{TableClient, TableDictionary};
use crate::signature::{Direction, Parameter, TargetType};
use crate::watch::StatusCell;

fn table_name(binding: &RuntimeBinding) -> Result<&str> {
    match binding {
        RuntimeBinding::Table { table } => Ok(table.as_str()),
        other => bail!("expected a table, got {}", other.kind()),
    }
}

// ============================================================================
// HANDLE
// ============================================================================

pub struct TableHandleProvider;

struct TableHandleBinder;

impl BinderProvider for TableHandleProvider {
    fn name(&self) -> &str {
        "table-handle"
    }

    fn find_binder(&self, kind: ResourceKind, target: &TargetType, _: Direction) -> Option<Arc<dyn Binder>> {
        match (kind, target) {
            (ResourceKind::Table, TargetType::TableHandle) => Some(Arc::new(TableHandleBinder)),
            _ => None,
        }
    }
}

impl Binder for TableHandleBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let table = table_name(binding)?;
        let client = TableClient::new(ctx.access.tables(ctx.connection())?, table);
        let pending = client.clone();
        Ok(BindResult::new(BoundValue::Table(client.clone()))
            .with_watcher(client.stats())
            .on_post_action(move || pending.flush()))
    }
}

// ============================================================================
// DICTIONARY
// ============================================================================

pub struct TableDictionaryProvider;

struct TableDictionaryBinder;

impl BinderProvider for TableDictionaryProvider {
    fn name(&self) -> &str {
        "table-dictionary"
    }

    fn find_binder(&self, kind: ResourceKind, target: &TargetType, _: Direction) -> Option<Arc<dyn Binder>> {
        match (kind, target) {
            (ResourceKind::Table, TargetType::TableDictionary) => Some(Arc::new(TableDictionaryBinder)),
            _ => None,
        }
    }
}

impl Binder for TableDictionaryBinder {
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let table = table_name(binding)?;
        let dictionary = TableDictionary::new(ctx.access.tables(ctx.connection())?, table);
        let pending = dictionary.clone();
        // The adapter's own flush, chained explicitly
        Ok(BindResult::new(BoundValue::Dictionary(dictionary.clone()))
            .with_watcher(dictionary.stats())
            .on_post_action(move || pending.flush()))
    }
}

// ============================================================================
// SINGLE ENTITY
// ============================================================================

pub struct TableEntityProvider;

struct TableEntityBinder;

impl BinderProvider for TableEntityProvider {
    fn name(&self) -> &str {
        "table-entity"
    }

    fn find_binder(&self, kind: ResourceKind, target: &TargetType, _: Direction) -> Option<Arc<dyn Binder>> {
        match (kind, target) {
            (ResourceKind::TableEntity, TargetType::TableEntity | TargetType::Json) => {
                Some(Arc::new(TableEntityBinder))
            }
            _ => None,
        }
    }
}

impl Binder for TableEntityBinder {
    /// Binds the entity (or null) and writes it back only if the function changed it
    fn bind(&self, ctx: &BindContext, binding: &RuntimeBinding, _: &Parameter) -> Result<BindResult> {
        let RuntimeBinding::TableEntity {
            table,
            partition_key,
            row_key,
        } = binding
        else {
            bail!("expected a table entity, got {}", binding.kind());
        };
        let store = ctx.access.tables(ctx.connection())?;
        let original = store
            .lookup(table, partition_key, row_key)?
            .map(Value::Object);

        let slot = Slot::new(original.clone());
        let status = StatusCell::new("");
        let (current, watch_status) = (slot.clone(), Arc::clone(&status));
        let (table, partition_key, row_key) = (table.clone(), partition_key.clone(), row_key.clone());

        Ok(BindResult::new(BoundValue::Slot(slot))
            .with_watcher(status)
            .on_post_action(move || {
                let updated = current.get();
                if updated == original {
                    return Ok(());
                }
                match updated {
                    Some(Value::Object(entity)) => {
                        store.upsert_batch(&table, &partition_key, vec![(row_key, entity)])?;
                        watch_status.set("1 entity updated.");
                        Ok(())
                    }
                    None | Some(Value::Null) => Ok(()),
                    Some(other) => bail!(
                        "entity {}/{} must be a JSON object, got {}",
                        partition_key,
                        row_key,
                        other
                    ),
                }
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::RuntimeBindingInputs;
    use crate::provider::ProviderChain;
    use crate::storage::{Entity, MemoryStorage};
    use serde_json::json;

    fn context(storage: &MemoryStorage) -> BindContext {
        BindContext::new(
            Arc::new(storage.clone()),
            Arc::new(ProviderChain::with_defaults()),
            Arc::new(RuntimeBindingInputs::new("acct")),
        )
    }

    fn entity_binding() -> RuntimeBinding {
        RuntimeBinding::TableEntity {
            table: "People".into(),
            partition_key: "p1".into(),
            row_key: "r1".into(),
        }
    }

    fn entity(value: Value) -> Entity {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn handle_flushes_in_post_action() {
        let storage = MemoryStorage::new();
        let ctx = context(&storage);
        let binding = RuntimeBinding::Table {
            table: "Scores".into(),
        };
        let result = ctx
            .chain
            .bind(&ctx, &binding, &Parameter::input("scores", TargetType::TableHandle))
            .unwrap();
        let (value, watcher, mut lifecycle) = result.into_parts();
        let BoundValue::Table(client) = value else {
            panic!("expected table handle");
        };
        client.write("p", "r", entity(json!({"v": 1}))).unwrap();
        assert_eq!(storage.row_count("Scores"), 0);

        assert!(lifecycle.run_post().is_empty());
        assert_eq!(storage.row_count("Scores"), 1);
        assert_eq!(watcher.unwrap().status(), "Wrote 1 rows.");
    }

    #[test]
    fn dictionary_flushes_in_post_action() {
        let storage = MemoryStorage::new();
        let ctx = context(&storage);
        let binding = RuntimeBinding::Table {
            table: "Kv".into(),
        };
        let (value, _, mut lifecycle) = ctx
            .chain
            .bind(&ctx, &binding, &Parameter::input("kv", TargetType::TableDictionary))
            .unwrap()
            .into_parts();
        let BoundValue::Dictionary(dict) = value else {
            panic!("expected dictionary");
        };
        dict.set("p", "r", entity(json!({"v": 2}))).unwrap();
        assert!(lifecycle.run_post().is_empty());
        assert_eq!(storage.entity("Kv", "p", "r"), Some(entity(json!({"v": 2}))));
    }

    #[test]
    fn entity_written_back_only_when_changed() {
        let storage = MemoryStorage::new();
        storage.put_entity("People", "p1", "r1", entity(json!({"name": "Ada"})));
        let ctx = context(&storage);
        let param = Parameter::input("person", TargetType::TableEntity);

        let (_, _, mut untouched) = ctx
            .chain
            .bind(&ctx, &entity_binding(), &param)
            .unwrap()
            .into_parts();
        assert!(untouched.run_post().is_empty());
        assert_eq!(storage.table_batches(), 0);

        let (value, watcher, mut changed) = ctx
            .chain
            .bind(&ctx, &entity_binding(), &param)
            .unwrap()
            .into_parts();
        let BoundValue::Slot(slot) = value else {
            panic!("expected slot");
        };
        assert_eq!(slot.get(), Some(json!({"name": "Ada"})));
        slot.set(json!({"name": "Grace"}));
        assert!(changed.run_post().is_empty());
        assert_eq!(
            storage.entity("People", "p1", "r1"),
            Some(entity(json!({"name": "Grace"})))
        );
        assert_eq!(watcher.unwrap().status(), "1 entity updated.");
    }

    #[test]
    fn missing_entity_binds_null() {
        let storage = MemoryStorage::new();
        let ctx = context(&storage);
        let (value, _, mut lifecycle) = ctx
            .chain
            .bind(&ctx, &entity_binding(), &Parameter::input("person", TargetType::Json))
            .unwrap()
            .into_parts();
        let BoundValue::Slot(slot) = value else {
            panic!("expected slot");
        };
        assert_eq!(slot.get(), None);
        assert!(lifecycle.run_post().is_empty());
        assert_eq!(storage.row_count("People"), 0);
    }

    #[test]
    fn non_object_entity_is_a_post_failure() {
        let storage = MemoryStorage::new();
        let ctx = context(&storage);
        let (value, _, mut lifecycle) = ctx
            .chain
            .bind(&ctx, &entity_binding(), &Parameter::input("person", TargetType::Json))
            .unwrap()
            .into_parts();
        if let BoundValue::Slot(slot) = value {
            slot.set(json!(42));
        }
        let errors = lifecycle.run_post();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("JSON object"));
    }
}
