use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tether_common::{Result, TetherError};
use tether_orm::{record_id, Record};
use tracing::debug;

use crate::stage::{SchemaValidator, StageContext};

/// Rejects a parent pointer update that would make an entity its own
/// ancestor in a self-referential tree.
///
/// Only runs when the data carries both `id` and a positive parent key.
/// The walk resolves the to-one `relation` once per level and stops at a
/// root, or at a row it has already visited.
#[derive(Debug, Clone)]
pub struct AncestorCycleCheck {
    parent_field: String,
    relation: String,
}

impl AncestorCycleCheck {
    pub fn new(parent_field: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            parent_field: parent_field.into(),
            relation: relation.into(),
        }
    }
}

impl Default for AncestorCycleCheck {
    fn default() -> Self {
        Self::new("parent_id", "parent")
    }
}

#[async_trait]
impl SchemaValidator for AncestorCycleCheck {
    fn skip_on_field_errors(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &StageContext<'_>, data: &Record) -> Result<()> {
        let parent_id = data.get(&self.parent_field).and_then(Value::as_i64);
        let (Some(id), Some(parent_id)) = (record_id(data), parent_id) else {
            return Ok(());
        };
        if parent_id <= 0 {
            return Ok(());
        }
        if parent_id == id {
            return Err(TetherError::Schema("An entity cannot be its own parent".into()));
        }

        let entity = ctx.schema.entity();
        let Some(mut current) = ctx.db.get(entity, parent_id).await? else {
            return Err(TetherError::Schema(format!("Parent {} not found", parent_id)));
        };

        let mut visited = HashSet::from([parent_id]);
        loop {
            current.resolve(&self.relation, ctx.db).await?;
            let Some(ancestor) = current.to_one(&self.relation)?.cloned() else {
                return Ok(());
            };
            let Some(ancestor_id) = ancestor.id() else {
                return Ok(());
            };
            if ancestor_id == id {
                return Err(TetherError::Schema(
                    "Cannot set a descendant as parent".into(),
                ));
            }
            if !visited.insert(ancestor_id) {
                debug!(entity, ancestor_id, "existing cycle in ancestor chain");
                return Ok(());
            }
            current = ancestor;
        }
    }
}
