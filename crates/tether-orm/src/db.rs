//! Store plus registry: what relation handles and processors need to run.

use std::sync::Arc;
use tether_common::Result;
use tracing::instrument;

use crate::entity::Entity;
use crate::filter::{Filter, Select};
use crate::record::PRIMARY_KEY;
use crate::registry::{EntityType, Registry};
use crate::store::{Store, TransactionScope};

/// Cheaply cloneable database handle.
#[derive(Clone)]
pub struct Db {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("registry", &self.registry).finish_non_exhaustive()
    }
}

impl Db {
    pub fn new(store: impl Store + 'static, registry: Registry) -> Self {
        Self::from_parts(Arc::new(store), Arc::new(registry))
    }

    pub fn from_parts(store: Arc<dyn Store>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn entity_type(&self, name: &str) -> Result<Arc<EntityType>> {
        self.registry.get(name)
    }

    #[instrument(skip(self, select), fields(filter = %select.filter))]
    pub async fn find(&self, type_name: &str, select: &Select) -> Result<Vec<Entity>> {
        let ty = self.entity_type(type_name)?;
        let rows = self.store.fetch(&ty, select).await?;
        Ok(rows
            .into_iter()
            .map(|row| Entity::new(Arc::clone(&ty), row))
            .collect())
    }

    pub async fn find_one(&self, type_name: &str, filter: Filter) -> Result<Option<Entity>> {
        let select = Select::new(filter).limit(1);
        Ok(self.find(type_name, &select).await?.into_iter().next())
    }

    pub async fn get(&self, type_name: &str, id: i64) -> Result<Option<Entity>> {
        self.find_one(type_name, Filter::eq(PRIMARY_KEY, id)).await
    }

    #[instrument(skip(self, filter), fields(filter = %filter))]
    pub async fn count(&self, type_name: &str, filter: &Filter) -> Result<u64> {
        let ty = self.entity_type(type_name)?;
        self.store.count(&ty, filter).await
    }

    pub async fn begin(&self) -> Result<TransactionScope> {
        Ok(TransactionScope::new(self.store.begin().await?))
    }
}
