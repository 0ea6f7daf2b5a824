use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_common::{Result, TetherError};
use tether_orm::{
    record_id, Db, Entity, EntityType, Filter, Record, Select, TransactionScope, PRIMARY_KEY,
};
use tracing::{debug, info, instrument};

use crate::stage::{LoadState, Loaded, PendingLink, PostLoad, StageContext};

/// Creates the entity, or loads and updates it when the data carries an
/// `id`, then applies pending links. All writes share one transactional
/// scope; any failure rolls every one of them back.
///
/// The returned entity is rebound so its relations reflect the links.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeInstance;

#[async_trait]
impl PostLoad for MaterializeInstance {
    #[instrument(skip_all, fields(entity = ctx.schema.entity()))]
    async fn process(&self, ctx: &StageContext<'_>, state: &mut LoadState) -> Result<()> {
        let ty = ctx.db.entity_type(ctx.schema.entity())?;
        let mut values = Record::new();
        for (name, value) in &state.data {
            if ty.has_column(name) {
                values.insert(name.clone(), value.clone());
            } else {
                debug!(field = %name, "not a column, not written");
            }
        }

        let mut tx = ctx.db.begin().await?;
        let outcome = write(ctx.db, &mut tx, ty, values, &state.links).await;
        let mut entity = tx.finish(outcome).await?;
        entity.rebind();
        info!(entity = %entity, links = state.links.len(), "materialized");

        state.output = Some(Loaded::Entity(Box::new(entity)));
        Ok(())
    }
}

async fn write(
    db: &Db,
    tx: &mut TransactionScope,
    ty: Arc<EntityType>,
    mut values: Record,
    links: &[PendingLink],
) -> Result<Entity> {
    let existing = record_id(&values);
    values.remove(PRIMARY_KEY);

    let entity = match existing {
        Some(id) => {
            let select = Select::new(Filter::eq(PRIMARY_KEY, id)).limit(1);
            let row = tx
                .fetch(&ty, &select)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| TetherError::NotFound {
                    entity: ty.name().to_string(),
                    id,
                })?;
            let mut entity = Entity::new(Arc::clone(&ty), row);
            entity.update(tx, values).await?;
            entity
        }
        None => Entity::create(tx, ty, values).await?,
    };

    let id = entity
        .id()
        .ok_or_else(|| TetherError::Internal(format!("{} has no id after write", entity)))?;
    for link in links {
        let target = db.entity_type(&link.target)?;
        let mut changes = Record::new();
        changes.insert(link.column.clone(), Value::from(id));
        let linked = tx
            .update_where(&target, &Filter::is_in(PRIMARY_KEY, link.ids.clone()), &changes)
            .await?;
        debug!(target = %link.target, column = %link.column, linked, "linked");
    }
    Ok(entity)
}

/// Deletes one row by primary key in its own transaction. Returns whether
/// a row was removed.
pub async fn delete_by_id(db: &Db, entity: &str, id: i64) -> Result<bool> {
    let ty = db.entity_type(entity)?;
    let mut tx = db.begin().await?;
    let outcome = tx.delete_where(&ty, &Filter::eq(PRIMARY_KEY, id)).await;
    let removed = tx.finish(outcome).await?;
    info!(entity, id, removed, "deleted");
    Ok(removed > 0)
}
