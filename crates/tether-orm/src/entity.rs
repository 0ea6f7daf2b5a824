//! Row-backed entities and their relation sets.

use futures::future::try_join_all;
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tether_common::{Result, TetherError};
use tracing::instrument;

use crate::db::Db;
use crate::record::{record_id, Record};
use crate::registry::EntityType;
use crate::relation::BoundRelation;
use crate::store::TransactionScope;

/// One stored row together with its lazily-bound relation handles.
///
/// Handles are bound on first access and stay until [`Entity::rebind`].
#[derive(Debug, Clone)]
pub struct Entity {
    ty: Arc<EntityType>,
    values: Record,
    extras: Record,
    relations: BTreeMap<String, BoundRelation>,
}

impl Entity {
    pub fn new(ty: Arc<EntityType>, values: Record) -> Self {
        Self {
            ty,
            values,
            extras: Record::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    pub fn id(&self) -> Option<i64> {
        record_id(&self.values)
    }

    pub fn is_persisted(&self) -> bool {
        self.id().is_some()
    }

    pub fn values(&self) -> &Record {
        &self.values
    }

    pub fn into_values(self) -> Record {
        self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Attaches a computed attribute that is not a stored column.
    pub fn set_extra(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.extras.insert(name.into(), value.into());
    }

    pub fn extra(&self, name: &str) -> Option<&Value> {
        self.extras.get(name)
    }

    /// Stored column or computed attribute, columns first.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.values.get(name).or_else(|| self.extras.get(name))
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.ty.relation(name).is_some()
    }

    /// Handle for `name`, binding it on first access.
    pub fn relation(&mut self, name: &str) -> Result<&mut BoundRelation> {
        match self.relations.entry(name.to_string()) {
            Entry::Occupied(bound) => Ok(bound.into_mut()),
            Entry::Vacant(slot) => {
                let rel = self.ty.relation(name).ok_or_else(|| TetherError::UnknownRelation {
                    entity: self.ty.name().to_string(),
                    relation: name.to_string(),
                })?;
                Ok(slot.insert(BoundRelation::bind(rel, &self.values)))
            }
        }
    }

    /// Handle for `name` without binding; unbound counts as not loaded.
    pub fn loaded(&self, name: &str) -> Result<&BoundRelation> {
        if let Some(bound) = self.relations.get(name) {
            return Ok(bound);
        }
        if self.has_relation(name) {
            Err(TetherError::RelationNotLoaded {
                relation: name.to_string(),
            })
        } else {
            Err(TetherError::UnknownRelation {
                entity: self.ty.name().to_string(),
                relation: name.to_string(),
            })
        }
    }

    pub fn loaded_mut(&mut self, name: &str) -> Result<&mut BoundRelation> {
        if !self.relations.contains_key(name) {
            self.loaded(name)?;
        }
        self.relations
            .get_mut(name)
            .ok_or_else(|| TetherError::RelationNotLoaded {
                relation: name.to_string(),
            })
    }

    /// Resolved to-one relation.
    pub fn to_one(&self, name: &str) -> Result<Option<&Entity>> {
        self.loaded(name)?.as_one()?.get()
    }

    /// Resolved to-many relation.
    pub fn to_many(&self, name: &str) -> Result<&[Entity]> {
        self.loaded(name)?.as_many()?.get()
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.relations.get(name).is_some_and(BoundRelation::is_resolved)
    }

    pub async fn resolve(&mut self, name: &str, db: &Db) -> Result<()> {
        self.relation(name)?.resolve(db).await
    }

    /// Resolves every declared relation concurrently. Handles that are
    /// already resolved are left alone.
    #[instrument(skip(self, db), fields(entity = %self))]
    pub async fn await_all(&mut self, db: &Db) -> Result<()> {
        let names: Vec<String> = self.ty.relation_names().map(str::to_string).collect();
        self.resolve_only(&names, db).await
    }

    /// Resolves the declared relations among `names` concurrently; names
    /// that are not relations of this type are ignored.
    pub async fn resolve_only<S: AsRef<str>>(&mut self, names: &[S], db: &Db) -> Result<()> {
        let mut wanted = HashSet::new();
        for name in names {
            let name = name.as_ref();
            if self.has_relation(name) {
                self.relation(name)?;
                wanted.insert(name.to_string());
            }
        }
        let pending = self
            .relations
            .iter_mut()
            .filter(|(name, bound)| wanted.contains(name.as_str()) && !bound.is_resolved())
            .map(|(_, bound)| bound.resolve(db));
        try_join_all(pending).await?;
        Ok(())
    }

    /// Discards every handle and binds fresh, unresolved ones from the
    /// current values.
    pub fn rebind(&mut self) {
        self.relations = self
            .ty
            .relations()
            .iter()
            .map(|rel| (rel.name.clone(), BoundRelation::bind(rel, &self.values)))
            .collect();
    }

    /// Inserts a new row, applying column defaults for absent columns.
    pub async fn create(
        tx: &mut TransactionScope,
        ty: Arc<EntityType>,
        mut values: Record,
    ) -> Result<Entity> {
        for column in ty.columns() {
            if let Some(default) = &column.default {
                if !values.contains_key(&column.name) {
                    values.insert(column.name.clone(), default.produce());
                }
            }
        }
        let row = tx.insert(&ty, &values).await?;
        Ok(Entity::new(ty, row))
    }

    /// Writes `changes` to this entity's row and refreshes its values.
    ///
    /// Relation handles are not rebound.
    pub async fn update(&mut self, tx: &mut TransactionScope, mut changes: Record) -> Result<()> {
        let id = self.id().ok_or_else(|| {
            TetherError::Internal(format!("cannot update an unsaved {}", self.ty.name()))
        })?;
        for column in self.ty.columns() {
            if let Some(on_update) = &column.on_update {
                if !changes.contains_key(&column.name) {
                    changes.insert(column.name.clone(), on_update.produce());
                }
            }
        }
        let row = tx
            .update(&self.ty, id, &changes)
            .await?
            .ok_or_else(|| TetherError::NotFound {
                entity: self.ty.name().to_string(),
                id,
            })?;
        self.values = row;
        Ok(())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "<{}-{}>", self.ty.name(), id),
            None => write!(f, "<{}-new>", self.ty.name()),
        }
    }
}
