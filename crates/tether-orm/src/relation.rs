//! Bound relation handles.
//!
//! A handle is bound to one owner entity. It starts unresolved; the first
//! `resolve()` issues exactly one query and caches the result, later calls
//! are no-ops. Reading before resolution fails with
//! [`TetherError::RelationNotLoaded`].

use serde_json::Value;
use std::fmt;
use tether_common::{Result, TetherError};
use tracing::{debug, instrument};

use crate::db::Db;
use crate::entity::Entity;
use crate::filter::{Filter, Select};
use crate::record::{Record, PRIMARY_KEY};
use crate::registry::{RelationKind, ResolvedRelation};

/// Load state of a handle.
#[derive(Debug, Clone)]
pub enum Resolution<T> {
    Unresolved,
    Resolved(T),
}

impl<T> Resolution<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Handle for a relation where the owner holds the foreign key.
#[derive(Debug, Clone)]
pub struct ToOne {
    name: String,
    target: String,
    condition: Filter,
    state: Resolution<Option<Box<Entity>>>,
}

impl ToOne {
    fn bind(rel: &ResolvedRelation, owner: &Record) -> Self {
        let key = owner.get(&rel.fk).cloned().unwrap_or(Value::Null);
        Self {
            name: rel.name.clone(),
            target: rel.target.clone(),
            condition: Filter::eq(PRIMARY_KEY, key),
            state: Resolution::Unresolved,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn condition(&self) -> &Filter {
        &self.condition
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }

    /// Related entity, `None` when the foreign key is null or dangling.
    pub fn get(&self) -> Result<Option<&Entity>> {
        match &self.state {
            Resolution::Resolved(found) => Ok(found.as_deref()),
            Resolution::Unresolved => Err(self.not_loaded()),
        }
    }

    pub fn get_mut(&mut self) -> Result<Option<&mut Entity>> {
        match &mut self.state {
            Resolution::Resolved(found) => Ok(found.as_deref_mut()),
            Resolution::Unresolved => Err(TetherError::RelationNotLoaded {
                relation: self.name.clone(),
            }),
        }
    }

    #[instrument(skip(self, db), fields(relation = %self.name, target = %self.target))]
    pub async fn resolve(&mut self, db: &Db) -> Result<()> {
        if self.is_resolved() {
            return Ok(());
        }
        // Null foreign key: nothing to fetch
        if matches!(&self.condition, Filter::Eq(_, Value::Null)) {
            self.state = Resolution::Resolved(None);
            return Ok(());
        }
        let select = Select::new(self.condition.clone()).limit(1);
        let found = db.find(&self.target, &select).await?.into_iter().next();
        debug!(found = found.is_some(), "Resolved to-one relation");
        self.state = Resolution::Resolved(found.map(Box::new));
        Ok(())
    }

    fn not_loaded(&self) -> TetherError {
        TetherError::RelationNotLoaded {
            relation: self.name.clone(),
        }
    }
}

impl fmt::Display for ToOne {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Resolution::Unresolved => {
                write!(f, "<{} {} where {}>", self.name, self.target, self.condition)
            }
            Resolution::Resolved(Some(entity)) => write!(f, "{}", entity),
            Resolution::Resolved(None) => write!(f, "None"),
        }
    }
}

/// Handle for a relation yielding an ordered sequence of entities.
#[derive(Debug, Clone)]
pub struct ToMany {
    name: String,
    target: String,
    condition: Filter,
    state: Resolution<Vec<Entity>>,
}

impl ToMany {
    fn bind(rel: &ResolvedRelation, owner: &Record) -> Self {
        let condition = match owner.get(PRIMARY_KEY).filter(|id| !id.is_null()) {
            // An owner that was never stored cannot be referenced yet.
            None => Filter::Never,
            Some(id) => match &rel.join {
                Some(join) => Filter::in_select(
                    PRIMARY_KEY,
                    join.table.clone(),
                    join.target_fk.clone(),
                    Filter::eq(join.owner_fk.clone(), id.clone()),
                ),
                None => Filter::eq(rel.fk.clone(), id.clone()),
            },
        };
        Self {
            name: rel.name.clone(),
            target: rel.target.clone(),
            condition,
            state: Resolution::Unresolved,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn condition(&self) -> &Filter {
        &self.condition
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }

    /// New unresolved handle whose condition is this one AND `predicate`.
    pub fn filter(&self, predicate: Filter) -> ToMany {
        self.condition_filter(predicate, Filter::and)
    }

    /// New unresolved handle combining this condition with `predicate`.
    pub fn condition_filter(
        &self,
        predicate: Filter,
        combine: impl FnOnce(Filter, Filter) -> Filter,
    ) -> ToMany {
        ToMany {
            name: self.name.clone(),
            target: self.target.clone(),
            condition: combine(self.condition.clone(), predicate),
            state: Resolution::Unresolved,
        }
    }

    pub fn get(&self) -> Result<&[Entity]> {
        match &self.state {
            Resolution::Resolved(items) => Ok(items),
            Resolution::Unresolved => Err(TetherError::RelationNotLoaded {
                relation: self.name.clone(),
            }),
        }
    }

    pub fn get_mut(&mut self) -> Result<&mut [Entity]> {
        match &mut self.state {
            Resolution::Resolved(items) => Ok(items),
            Resolution::Unresolved => Err(TetherError::RelationNotLoaded {
                relation: self.name.clone(),
            }),
        }
    }

    /// First related entity. Served from the cache once resolved; otherwise
    /// queries with a limit of one without populating the cache.
    pub async fn first(&self, db: &Db) -> Result<Option<Entity>> {
        if let Resolution::Resolved(items) = &self.state {
            return Ok(items.first().cloned());
        }
        let select = Select::new(self.condition.clone()).limit(1);
        Ok(db.find(&self.target, &select).await?.into_iter().next())
    }

    #[instrument(skip(self, db), fields(relation = %self.name, target = %self.target))]
    pub async fn resolve(&mut self, db: &Db) -> Result<()> {
        if self.is_resolved() {
            return Ok(());
        }
        let items = db.find(&self.target, &Select::new(self.condition.clone())).await?;
        debug!(count = items.len(), "Resolved to-many relation");
        self.state = Resolution::Resolved(items);
        Ok(())
    }
}

impl fmt::Display for ToMany {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Resolution::Unresolved => {
                write!(f, "<{} {} where {}>", self.name, self.target, self.condition)
            }
            Resolution::Resolved(items) => {
                let labels: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", labels.join(", "))
            }
        }
    }
}

/// Relation handle of either cardinality.
#[derive(Debug, Clone)]
pub enum BoundRelation {
    One(ToOne),
    Many(ToMany),
}

impl BoundRelation {
    /// Builds an unresolved handle from the owner's current values.
    pub fn bind(rel: &ResolvedRelation, owner: &Record) -> Self {
        match rel.kind {
            RelationKind::ToOne => BoundRelation::One(ToOne::bind(rel, owner)),
            RelationKind::ToMany | RelationKind::ToManyViaJoin => {
                BoundRelation::Many(ToMany::bind(rel, owner))
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BoundRelation::One(r) => r.name(),
            BoundRelation::Many(r) => r.name(),
        }
    }

    pub fn target(&self) -> &str {
        match self {
            BoundRelation::One(r) => r.target(),
            BoundRelation::Many(r) => r.target(),
        }
    }

    pub fn condition(&self) -> &Filter {
        match self {
            BoundRelation::One(r) => r.condition(),
            BoundRelation::Many(r) => r.condition(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self {
            BoundRelation::One(r) => r.is_resolved(),
            BoundRelation::Many(r) => r.is_resolved(),
        }
    }

    pub async fn resolve(&mut self, db: &Db) -> Result<()> {
        match self {
            BoundRelation::One(r) => r.resolve(db).await,
            BoundRelation::Many(r) => r.resolve(db).await,
        }
    }

    pub fn as_one(&self) -> Result<&ToOne> {
        match self {
            BoundRelation::One(r) => Ok(r),
            BoundRelation::Many(r) => Err(wrong_shape(r.name(), "to-many")),
        }
    }

    pub fn as_many(&self) -> Result<&ToMany> {
        match self {
            BoundRelation::Many(r) => Ok(r),
            BoundRelation::One(r) => Err(wrong_shape(r.name(), "to-one")),
        }
    }

    pub fn as_many_mut(&mut self) -> Result<&mut ToMany> {
        match self {
            BoundRelation::Many(r) => Ok(r),
            BoundRelation::One(r) => Err(wrong_shape(r.name(), "to-one")),
        }
    }

    /// Resolved related entities as a mutable slice of zero or more items.
    pub fn entities_mut(&mut self) -> Result<Vec<&mut Entity>> {
        match self {
            BoundRelation::One(r) => Ok(r.get_mut()?.into_iter().collect()),
            BoundRelation::Many(r) => Ok(r.get_mut()?.iter_mut().collect()),
        }
    }
}

impl fmt::Display for BoundRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundRelation::One(r) => fmt::Display::fmt(r, f),
            BoundRelation::Many(r) => fmt::Display::fmt(r, f),
        }
    }
}

fn wrong_shape(name: &str, actual: &str) -> TetherError {
    TetherError::Internal(format!("relation '{}' is {}", name, actual))
}
