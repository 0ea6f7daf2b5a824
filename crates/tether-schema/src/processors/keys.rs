use std::collections::HashSet;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tether_common::{ErrorMap, Result, TetherError};
use tether_orm::{Db, Entity, Filter, Select, PRIMARY_KEY};
use tracing::debug;

use crate::stage::{LoadState, PendingLink, PostLoad, StageContext};

fn not_found(field: &str, missing: Vec<i64>) -> TetherError {
    TetherError::ForeignKeyNotFound {
        field: field.to_string(),
        missing,
    }
}

/// Verifies the keys in `value` exist as `target` rows and returns them.
/// Null and empty lists are skipped.
async fn check(db: &Db, field: &str, target: &str, value: &Value) -> Result<Option<Vec<i64>>> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) if items.is_empty() => Ok(None),
        Value::Array(items) => {
            // Repeated ids name one row
            let mut ids: Vec<i64> = Vec::with_capacity(items.len());
            for id in items.iter().filter_map(Value::as_i64) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            let found = db
                .find(target, &Select::new(Filter::is_in(PRIMARY_KEY, ids.clone())))
                .await?;
            if found.len() != ids.len() {
                let present: HashSet<i64> = found.iter().filter_map(Entity::id).collect();
                let missing: Vec<i64> = ids.into_iter().filter(|id| !present.contains(id)).collect();
                return Err(not_found(field, missing));
            }
            Ok(Some(ids))
        }
        other => {
            let id = other
                .as_i64()
                .ok_or_else(|| TetherError::FieldValidation {
                    field: field.to_string(),
                    message: "Not a valid integer.".into(),
                })?;
            if id <= 0 || db.get(target, id).await?.is_none() {
                return Err(not_found(field, vec![id]));
            }
            Ok(Some(vec![id]))
        }
    }
}

/// Existence check for every `key_check` field present in the data.
///
/// All checks run concurrently and every failure is reported. Fields that
/// also carry a `link` column are removed from the data and recorded as
/// [`PendingLink`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckForeignKeys;

#[async_trait]
impl PostLoad for CheckForeignKeys {
    async fn process(&self, ctx: &StageContext<'_>, state: &mut LoadState) -> Result<()> {
        let db = ctx.db;
        let data = &state.data;
        let checks = ctx.schema.load_fields().filter_map(move |field| {
            let target = field.key_target()?;
            let value = data.get(field.name())?;
            Some(async move { (field, target, check(db, field.name(), target, value).await) })
        });
        let outcomes = join_all(checks).await;

        let mut errors = ErrorMap::new();
        let mut links = Vec::new();
        for (field, target, outcome) in outcomes {
            match outcome {
                Ok(ids) => {
                    if let Some(column) = field.link_column() {
                        links.push(PendingLink {
                            field: field.name().to_string(),
                            target: target.to_string(),
                            column: column.to_string(),
                            ids: ids.unwrap_or_default(),
                        });
                    }
                }
                Err(err) => {
                    if let Some(other) = errors.absorb(err) {
                        return Err(other);
                    }
                }
            }
        }
        if !errors.is_empty() {
            return Err(TetherError::Validation(errors));
        }

        for link in links {
            state.data.remove(&link.field);
            if !link.ids.is_empty() {
                debug!(field = %link.field, target = %link.target, ids = link.ids.len(), "pending link");
                state.links.push(link);
            }
        }
        Ok(())
    }
}
