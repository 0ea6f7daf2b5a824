//! Field declarations.
//!
//! A [`FieldSpec`] names one input/output field of a schema: its kind, its
//! direction (`load_only` / `dump_only`), and the annotations the canonical
//! processors read (`query`, `key_check`, `link`).

use std::fmt;
use std::sync::Arc;

use crate::schema::Schema;
use crate::stage::FieldValidator;

/// How a query-annotated field turns into a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    /// `column = value`, or `column IN (...)` for list values
    Equals,
    /// Substring match, `column LIKE %value%`
    Like,
}

/// Schema a nested field marshals with.
#[derive(Clone)]
pub enum NestedTarget {
    /// The enclosing schema
    This,
    Schema(Arc<Schema>),
}

impl fmt::Debug for NestedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NestedTarget::This => f.write_str("This"),
            NestedTarget::Schema(schema) => write!(f, "Schema({})", schema.name()),
        }
    }
}

/// A nested field: an embedded entity (or list of entities) serialized
/// with another schema, optionally restricted to a field subset.
#[derive(Debug, Clone)]
pub struct Nested {
    pub target: NestedTarget,
    pub only: Option<Vec<String>>,
    pub many: bool,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Integer,
    Float,
    String,
    Boolean,
    /// RFC 3339 timestamp
    DateTime,
    List(Box<FieldKind>),
    Nested(Nested),
}

impl FieldKind {
    pub fn is_list(&self) -> bool {
        matches!(self, FieldKind::List(_))
    }
}

/// One declared field of a [`Schema`].
#[derive(Clone)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    load_only: bool,
    dump_only: bool,
    required: bool,
    nullable: Option<bool>,
    query: Option<QueryOp>,
    key_check: Option<String>,
    link: Option<String>,
    validators: Vec<Arc<dyn FieldValidator>>,
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("load_only", &self.load_only)
            .field("dump_only", &self.dump_only)
            .field("required", &self.required)
            .field("query", &self.query)
            .field("key_check", &self.key_check)
            .field("link", &self.link)
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            load_only: false,
            dump_only: false,
            required: false,
            nullable: None,
            query: None,
            key_check: None,
            link: None,
            validators: Vec::new(),
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn list(name: impl Into<String>, inner: FieldKind) -> Self {
        Self::new(name, FieldKind::List(Box::new(inner)))
    }

    /// Nested field serialized with another schema.
    pub fn nested(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self::new(
            name,
            FieldKind::Nested(Nested {
                target: NestedTarget::Schema(schema),
                only: None,
                many: false,
            }),
        )
    }

    /// Nested field serialized with the enclosing schema.
    pub fn nested_self(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Nested(Nested {
                target: NestedTarget::This,
                only: None,
                many: false,
            }),
        )
    }

    pub fn load_only(mut self) -> Self {
        self.load_only = true;
        self
    }

    pub fn dump_only(mut self) -> Self {
        self.dump_only = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Marks the field as a query predicate for list and count schemas.
    pub fn query(mut self, op: QueryOp) -> Self {
        self.query = Some(op);
        self
    }

    /// Values must be primary keys of existing `entity` rows.
    pub fn key_check(mut self, entity: impl Into<String>) -> Self {
        self.key_check = Some(entity.into());
        self
    }

    /// After materialization, point `column` on the checked rows at the
    /// materialized entity. Requires `key_check`.
    pub fn link(mut self, column: impl Into<String>) -> Self {
        self.link = Some(column.into());
        self
    }

    pub fn validate(mut self, validator: impl FieldValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Restricts a nested field to the given subfields.
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let FieldKind::Nested(nested) = &mut self.kind {
            nested.only = Some(names.into_iter().map(Into::into).collect());
        }
        self
    }

    /// Nested field holds a list of entities.
    pub fn many(mut self) -> Self {
        if let FieldKind::Nested(nested) = &mut self.kind {
            nested.many = true;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn as_nested(&self) -> Option<&Nested> {
        match &self.kind {
            FieldKind::Nested(nested) => Some(nested),
            _ => None,
        }
    }

    pub fn is_load_only(&self) -> bool {
        self.load_only
    }

    pub fn is_dump_only(&self) -> bool {
        self.dump_only
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Explicit nulls are accepted unless the field is required or was
    /// declared non-nullable.
    pub fn is_nullable(&self) -> bool {
        self.nullable.unwrap_or(!self.required)
    }

    pub fn query_op(&self) -> Option<QueryOp> {
        self.query
    }

    pub fn key_target(&self) -> Option<&str> {
        self.key_check.as_deref()
    }

    pub fn link_column(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn validators(&self) -> &[Arc<dyn FieldValidator>] {
        &self.validators
    }

    /// Whether the field takes part in load.
    pub fn loads(&self) -> bool {
        !self.dump_only
    }

    /// Whether the field takes part in dump.
    pub fn dumps(&self) -> bool {
        !self.load_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullable_follows_required_by_default() {
        assert!(FieldSpec::integer("parent_id").is_nullable());
        assert!(!FieldSpec::string("name").required().is_nullable());
        assert!(FieldSpec::string("name").required().nullable(true).is_nullable());
        assert!(!FieldSpec::string("code").nullable(false).is_nullable());
    }

    #[test]
    fn test_nested_modifiers() {
        let field = FieldSpec::nested_self("children").many().only(["id", "name"]);
        let nested = field.as_nested().unwrap();
        assert!(nested.many);
        assert_eq!(nested.only.as_deref(), Some(&["id".to_string(), "name".to_string()][..]));
        assert!(matches!(nested.target, NestedTarget::This));
    }

    #[test]
    fn test_only_ignored_on_scalar() {
        let field = FieldSpec::integer("id").only(["x"]).many();
        assert!(field.as_nested().is_none());
    }

    #[test]
    fn test_direction() {
        let field = FieldSpec::integer("limit").load_only();
        assert!(field.loads());
        assert!(!field.dumps());
        let field = FieldSpec::datetime("create_time").dump_only();
        assert!(!field.loads());
        assert!(field.dumps());
    }
}
