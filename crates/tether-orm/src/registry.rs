//! Entity type declarations and relation resolution.
//!
//! Registration is two-phase: every [`EntityDecl`] is collected first, then
//! [`RegistryBuilder::build`] resolves each relation descriptor into a
//! [`ResolvedRelation`] with concrete foreign-key columns. Descriptors may
//! name types declared later (or themselves), and resolution happens exactly
//! once per descriptor.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tether_common::{Result, TetherError};
use tracing::debug;

use crate::record::PRIMARY_KEY;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Json,
}

impl ColumnKind {
    /// Explicit SQL cast needed when binding a JSON-encoded value
    pub fn sql_cast(&self) -> Option<&'static str> {
        match self {
            ColumnKind::Timestamp => Some("timestamptz"),
            ColumnKind::Json => Some("jsonb"),
            _ => None,
        }
    }
}

/// Value a column takes when a write leaves it unset.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    Value(Value),
    /// Current UTC time, RFC 3339 encoded
    Now,
}

impl ColumnDefault {
    pub fn produce(&self) -> Value {
        match self {
            ColumnDefault::Value(v) => v.clone(),
            ColumnDefault::Now => Value::String(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// `table.column` a foreign-key column points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

/// Column declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub foreign_key: Option<ForeignKeyRef>,
    /// Applied on insert when the column is absent
    pub default: Option<ColumnDefault>,
    /// Applied on every update
    pub on_update: Option<ColumnDefault>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            foreign_key: None,
            default: None,
            on_update: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Float)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Boolean)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Timestamp)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Json)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Foreign key onto `table.id`
    pub fn references(self, table: impl Into<String>) -> Self {
        self.references_column(table, PRIMARY_KEY)
    }

    pub fn references_column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKeyRef {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    pub fn default_now(mut self) -> Self {
        self.default = Some(ColumnDefault::Now);
        self
    }

    pub fn on_update_now(mut self) -> Self {
        self.on_update = Some(ColumnDefault::Now);
        self
    }

    fn references_table(&self, table: &str) -> bool {
        self.foreign_key.as_ref().is_some_and(|fk| fk.table == table)
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Owner holds a foreign key to the target
    ToOne,
    /// Target holds a foreign key to the owner
    ToMany,
    /// Owner and target are linked through join rows
    ToManyViaJoin,
}

/// Unresolved relation declaration, as written by the model author.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    pub target: String,
    pub join: Option<String>,
    pub fk: Option<String>,
    pub join_fk: Option<String>,
}

impl RelationDescriptor {
    pub fn describe(
        kind: RelationKind,
        target: &str,
        join: Option<&str>,
        fk: Option<&str>,
        join_fk: Option<&str>,
    ) -> Self {
        Self {
            kind,
            target: target.to_string(),
            join: join.map(str::to_string),
            fk: fk.map(str::to_string),
            join_fk: join_fk.map(str::to_string),
        }
    }

    pub fn to_one(target: &str) -> Self {
        Self::describe(RelationKind::ToOne, target, None, None, None)
    }

    pub fn to_many(target: &str) -> Self {
        Self::describe(RelationKind::ToMany, target, None, None, None)
    }

    pub fn to_many_via_join(target: &str, join: &str) -> Self {
        Self::describe(RelationKind::ToManyViaJoin, target, Some(join), None, None)
    }

    /// Explicit foreign-key column, bypassing inference
    pub fn fk(mut self, column: &str) -> Self {
        self.fk = Some(column.to_string());
        self
    }

    /// Explicit target-side column on the join type
    pub fn join_fk(mut self, column: &str) -> Self {
        self.join_fk = Some(column.to_string());
        self
    }
}

/// Join type details of a resolved many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub entity: String,
    pub table: String,
    /// Join column referencing the owner
    pub owner_fk: String,
    /// Join column referencing the target
    pub target_fk: String,
}

/// Relation with its foreign-key columns worked out.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelation {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub target_table: String,
    /// For `ToOne` a column on the owner; for `ToMany` a column on the target.
    /// Empty for `ToManyViaJoin`, which uses [`JoinSpec`] instead.
    pub fk: String,
    pub join: Option<JoinSpec>,
}

/// Entity type declaration (phase one).
#[derive(Debug, Clone)]
pub struct EntityDecl {
    name: String,
    table: String,
    columns: Vec<ColumnDef>,
    relations: Vec<(String, RelationDescriptor)>,
}

impl EntityDecl {
    /// Declares a type backed by `table`, with an integer `id` primary key.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: vec![ColumnDef::integer(PRIMARY_KEY)],
            relations: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.retain(|c| c.name != column.name);
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        for column in columns {
            self = self.column(column);
        }
        self
    }

    pub fn relation(mut self, name: impl Into<String>, descriptor: RelationDescriptor) -> Self {
        self.relations.push((name.into(), descriptor));
        self
    }

    fn foreign_keys_to(&self, table: &str) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.references_table(table))
            .map(|c| c.name.as_str())
            .collect()
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Resolved entity type (phase two).
#[derive(Debug)]
pub struct EntityType {
    name: String,
    table: String,
    columns: Vec<ColumnDef>,
    relations: Vec<ResolvedRelation>,
}

impl EntityType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Declared relations in declaration order
    pub fn relations(&self) -> &[ResolvedRelation] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&ResolvedRelation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(|r| r.name.as_str())
    }
}

/// Registry of every declared entity type, keyed by type name.
#[derive(Debug, Default)]
pub struct Registry {
    types: HashMap<String, Arc<EntityType>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<Arc<EntityType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| TetherError::UnknownRelatedType(name.to_string()))
    }

    pub fn by_table(&self, table: &str) -> Option<Arc<EntityType>> {
        self.types.values().find(|t| t.table == table).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

/// Collects declarations until every type is known.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    decls: Vec<EntityDecl>,
}

impl RegistryBuilder {
    pub fn declare(mut self, decl: EntityDecl) -> Self {
        self.decls.push(decl);
        self
    }

    /// Resolves every relation descriptor.
    ///
    /// Fails with `UnknownRelatedType` when a target or join type was never
    /// declared, and with `RelationConfiguration` when a foreign key cannot be
    /// inferred unambiguously.
    pub fn build(self) -> Result<Registry> {
        let mut by_name: HashMap<&str, &EntityDecl> = HashMap::new();
        for decl in &self.decls {
            if by_name.insert(decl.name.as_str(), decl).is_some() {
                return Err(TetherError::RelationConfiguration(format!(
                    "entity type '{}' declared twice",
                    decl.name
                )));
            }
        }

        let mut types = HashMap::new();
        for decl in &self.decls {
            let mut relations = Vec::with_capacity(decl.relations.len());
            for (name, descriptor) in &decl.relations {
                let resolved = resolve_descriptor(decl, name, descriptor, &by_name)?;
                debug!(
                    entity = %decl.name,
                    relation = %name,
                    target = %resolved.target,
                    fk = %resolved.fk,
                    "Resolved relation"
                );
                relations.push(resolved);
            }
            types.insert(
                decl.name.clone(),
                Arc::new(EntityType {
                    name: decl.name.clone(),
                    table: decl.table.clone(),
                    columns: decl.columns.clone(),
                    relations,
                }),
            );
        }
        Ok(Registry { types })
    }
}

fn lookup<'a>(by_name: &HashMap<&str, &'a EntityDecl>, name: &str) -> Result<&'a EntityDecl> {
    by_name
        .get(name)
        .copied()
        .ok_or_else(|| TetherError::UnknownRelatedType(name.to_string()))
}

/// Picks the single column on `many` referencing `one`, or validates an
/// explicit choice.
fn infer_fk(many: &EntityDecl, one: &EntityDecl, explicit: Option<&str>) -> Result<String> {
    if let Some(column) = explicit {
        if !many.has_column(column) {
            return Err(TetherError::RelationConfiguration(format!(
                "{} has no column '{}'",
                many.name, column
            )));
        }
        return Ok(column.to_string());
    }
    let candidates = many.foreign_keys_to(&one.table);
    match candidates.as_slice() {
        [only] => Ok(only.to_string()),
        _ => Err(TetherError::RelationConfiguration(format!(
            "Can't figure out the foreign key: {} has {} foreign key(s) referencing {}",
            many.name,
            candidates.len(),
            one.name
        ))),
    }
}

fn resolve_descriptor(
    owner: &EntityDecl,
    name: &str,
    descriptor: &RelationDescriptor,
    by_name: &HashMap<&str, &EntityDecl>,
) -> Result<ResolvedRelation> {
    let target = lookup(by_name, &descriptor.target)?;
    let (fk, join) = match descriptor.kind {
        RelationKind::ToOne => (infer_fk(owner, target, descriptor.fk.as_deref())?, None),
        RelationKind::ToMany => (infer_fk(target, owner, descriptor.fk.as_deref())?, None),
        RelationKind::ToManyViaJoin => {
            let join_name = descriptor.join.as_deref().ok_or_else(|| {
                TetherError::RelationConfiguration(format!(
                    "relation '{}.{}' goes through a join but names no join type",
                    owner.name, name
                ))
            })?;
            let join = lookup(by_name, join_name)?;
            let owner_fk = infer_fk(join, owner, descriptor.fk.as_deref())?;
            let target_fk = infer_fk(join, target, descriptor.join_fk.as_deref())?;
            (
                String::new(),
                Some(JoinSpec {
                    entity: join.name.clone(),
                    table: join.table.clone(),
                    owner_fk,
                    target_fk,
                }),
            )
        }
    };
    Ok(ResolvedRelation {
        name: name.to_string(),
        kind: descriptor.kind,
        target: target.name.clone(),
        target_table: target.table.clone(),
        fk,
        join,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category() -> EntityDecl {
        EntityDecl::new("Categories", "categories")
            .column(ColumnDef::text("name"))
            .column(ColumnDef::integer("parent_id").nullable().references("categories"))
            .relation("parent", RelationDescriptor::to_one("Categories"))
            .relation("children", RelationDescriptor::to_many("Categories"))
    }

    #[test]
    fn test_self_referential_inference() {
        let registry = Registry::builder().declare(category()).build().unwrap();
        let ty = registry.get("Categories").unwrap();
        assert_eq!(ty.relation("parent").unwrap().fk, "parent_id");
        assert_eq!(ty.relation("children").unwrap().fk, "parent_id");
        assert_eq!(ty.relation_names().collect::<Vec<_>>(), vec!["parent", "children"]);
    }

    #[test]
    fn test_forward_reference_resolves() {
        let spu = EntityDecl::new("Spu", "spu")
            .column(ColumnDef::integer("brand_id").references("brand"))
            .relation("brand", RelationDescriptor::to_one("Brand"));
        let brand = EntityDecl::new("Brand", "brand")
            .relation("spus", RelationDescriptor::to_many("Spu"));
        let registry = Registry::builder().declare(spu).declare(brand).build().unwrap();
        assert_eq!(registry.get("Brand").unwrap().relation("spus").unwrap().fk, "brand_id");
    }

    #[test]
    fn test_unknown_target() {
        let decl = EntityDecl::new("A", "a").relation("ghost", RelationDescriptor::to_one("Ghost"));
        let err = Registry::builder().declare(decl).build().unwrap_err();
        assert!(matches!(err, TetherError::UnknownRelatedType(name) if name == "Ghost"));
    }

    #[test]
    fn test_ambiguous_fk() {
        let user = EntityDecl::new("User", "users");
        let message = EntityDecl::new("Message", "messages")
            .column(ColumnDef::integer("sender_id").references("users"))
            .column(ColumnDef::integer("receiver_id").references("users"))
            .relation("sender", RelationDescriptor::to_one("User"));
        let err = Registry::builder()
            .declare(user.clone())
            .declare(message.clone())
            .build()
            .unwrap_err();
        assert!(matches!(err, TetherError::RelationConfiguration(_)));

        let message = EntityDecl::new("Message", "messages")
            .column(ColumnDef::integer("sender_id").references("users"))
            .column(ColumnDef::integer("receiver_id").references("users"))
            .relation("sender", RelationDescriptor::to_one("User").fk("sender_id"));
        let registry = Registry::builder().declare(user).declare(message).build().unwrap();
        assert_eq!(registry.get("Message").unwrap().relation("sender").unwrap().fk, "sender_id");
    }

    #[test]
    fn test_missing_fk() {
        let a = EntityDecl::new("A", "a").relation("bs", RelationDescriptor::to_many("B"));
        let b = EntityDecl::new("B", "b");
        let err = Registry::builder().declare(a).declare(b).build().unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_join_resolution() {
        let spu = EntityDecl::new("Spu", "spu").relation(
            "options",
            RelationDescriptor::to_many_via_join("Options", "SpuOptions"),
        );
        let options = EntityDecl::new("Options", "options");
        let join = EntityDecl::new("SpuOptions", "spu_options")
            .column(ColumnDef::integer("spu_id").references("spu"))
            .column(ColumnDef::integer("option_id").references("options"));
        let registry = Registry::builder()
            .declare(spu)
            .declare(options)
            .declare(join)
            .build()
            .unwrap();
        let rel = registry.get("Spu").unwrap().relation("options").unwrap().clone();
        let join = rel.join.unwrap();
        assert_eq!(join.table, "spu_options");
        assert_eq!(join.owner_fk, "spu_id");
        assert_eq!(join.target_fk, "option_id");
    }

    #[test]
    fn test_join_without_join_type() {
        let a = EntityDecl::new("A", "a").relation(
            "bs",
            RelationDescriptor::describe(RelationKind::ToManyViaJoin, "A", None, None, None),
        );
        let err = Registry::builder().declare(a).build().unwrap_err();
        assert!(matches!(err, TetherError::RelationConfiguration(_)));
    }

    #[test]
    fn test_duplicate_declaration() {
        let err = Registry::builder()
            .declare(EntityDecl::new("A", "a"))
            .declare(EntityDecl::new("A", "a2"))
            .build()
            .unwrap_err();
        assert!(matches!(err, TetherError::RelationConfiguration(_)));
    }
}
