//! Store-agnostic row predicates.
//!
//! A [`Filter`] is built once and either evaluated in memory against a
//! [`Record`] or rendered to SQL by the PostgreSQL store.

use serde_json::Value;
use std::fmt;

use crate::record::{values_equal, Record};

/// Row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row
    Always,
    /// Matches no row
    Never,
    /// `column = value`; a null operand means `column IS NULL`
    Eq(String, Value),
    /// `column IN (values)`
    In(String, Vec<Value>),
    /// Case-sensitive substring match
    Like(String, String),
    /// `column IN (SELECT select FROM table WHERE filter)`
    InSelect {
        column: String,
        table: String,
        select: String,
        filter: Box<Filter>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn like(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Like(column.into(), needle.into())
    }

    /// Subquery membership: `column IN (SELECT select FROM table WHERE filter)`
    pub fn in_select(
        column: impl Into<String>,
        table: impl Into<String>,
        select: impl Into<String>,
        filter: Filter,
    ) -> Self {
        Filter::InSelect {
            column: column.into(),
            table: table.into(),
            select: select.into(),
            filter: Box::new(filter),
        }
    }

    /// Conjunction, flattening nested ANDs and dropping `Always`.
    pub fn and(self, other: Filter) -> Filter {
        Filter::all([self, other])
    }

    /// Disjunction, flattening nested ORs and dropping `Never`.
    pub fn or(self, other: Filter) -> Filter {
        Filter::any([self, other])
    }

    pub fn negate(self) -> Filter {
        match self {
            Filter::Always => Filter::Never,
            Filter::Never => Filter::Always,
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    /// AND of every filter; `Always` when empty.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Filter {
        let mut parts = Vec::new();
        for filter in filters {
            match filter {
                Filter::Always => {}
                Filter::Never => return Filter::Never,
                Filter::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Filter::Always,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    /// OR of every filter; `Never` when empty.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Filter {
        let mut parts = Vec::new();
        for filter in filters {
            match filter {
                Filter::Never => {}
                Filter::Always => return Filter::Always,
                Filter::Or(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Filter::Never,
            1 => parts.remove(0),
            _ => Filter::Or(parts),
        }
    }

    /// Evaluate against a row.
    ///
    /// `subquery` answers `InSelect` nodes: given `(table, select, filter)` it
    /// returns the selected column values.
    pub fn matches<F>(&self, record: &Record, subquery: &F) -> bool
    where
        F: Fn(&str, &str, &Filter) -> Vec<Value>,
    {
        match self {
            Filter::Always => true,
            Filter::Never => false,
            Filter::Eq(column, Value::Null) => {
                matches!(record.get(column), None | Some(Value::Null))
            }
            Filter::Eq(column, value) => record
                .get(column)
                .is_some_and(|stored| values_equal(stored, value)),
            Filter::In(column, values) => record
                .get(column)
                .is_some_and(|stored| values.iter().any(|v| values_equal(stored, v))),
            Filter::Like(column, needle) => record
                .get(column)
                .and_then(Value::as_str)
                .is_some_and(|stored| stored.contains(needle.as_str())),
            Filter::InSelect {
                column,
                table,
                select,
                filter,
            } => {
                let Some(stored) = record.get(column) else {
                    return false;
                };
                subquery(table, select, filter)
                    .iter()
                    .any(|v| values_equal(stored, v))
            }
            Filter::And(parts) => parts.iter().all(|p| p.matches(record, subquery)),
            Filter::Or(parts) => parts.iter().any(|p| p.matches(record, subquery)),
            Filter::Not(inner) => !inner.matches(record, subquery),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Always
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Always => write!(f, "TRUE"),
            Filter::Never => write!(f, "FALSE"),
            Filter::Eq(column, Value::Null) => write!(f, "{} IS NULL", column),
            Filter::Eq(column, value) => write!(f, "{} = {}", column, value),
            Filter::In(column, values) => {
                let values: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "{} IN ({})", column, values.join(", "))
            }
            Filter::Like(column, needle) => write!(f, "{} LIKE '%{}%'", column, needle),
            Filter::InSelect {
                column,
                table,
                select,
                filter,
            } => write!(
                f,
                "{} IN (SELECT {} FROM {} WHERE {})",
                column, select, table, filter
            ),
            Filter::And(parts) => join(f, parts, " AND "),
            Filter::Or(parts) => join(f, parts, " OR "),
            Filter::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[Filter], sep: &str) -> fmt::Result {
    let rendered: Vec<String> = parts.iter().map(|p| format!("({})", p)).collect();
    write!(f, "{}", rendered.join(sep))
}

/// Sort direction for [`Select::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Query description: filter plus paging and ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    pub filter: Filter,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Vec<(String, Order)>,
}

impl Select {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn no_subquery(_: &str, _: &str, _: &Filter) -> Vec<Value> {
        Vec::new()
    }

    #[test]
    fn test_eq_null_matches_missing_and_null() {
        let filter = Filter::eq("parent_id", Value::Null);
        assert!(filter.matches(&row(json!({"id": 1})), &no_subquery));
        assert!(filter.matches(&row(json!({"parent_id": null})), &no_subquery));
        assert!(!filter.matches(&row(json!({"parent_id": 2})), &no_subquery));
    }

    #[test]
    fn test_like_is_substring() {
        let filter = Filter::like("name", "ine");
        assert!(filter.matches(&row(json!({"name": "Felines"})), &no_subquery));
        assert!(!filter.matches(&row(json!({"name": "Dogs"})), &no_subquery));
        assert!(!filter.matches(&row(json!({"name": 3})), &no_subquery));
    }

    #[test]
    fn test_in_select_uses_resolver() {
        let filter = Filter::in_select("id", "spu_options", "option_id", Filter::eq("spu_id", 1));
        let resolver = |table: &str, select: &str, _: &Filter| {
            assert_eq!(table, "spu_options");
            assert_eq!(select, "option_id");
            vec![json!(4), json!(5)]
        };
        assert!(filter.matches(&row(json!({"id": 5})), &resolver));
        assert!(!filter.matches(&row(json!({"id": 6})), &resolver));
    }

    #[test]
    fn test_combinators_flatten() {
        let f = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::Always);
        assert!(matches!(&f, Filter::And(parts) if parts.len() == 2));
        assert_eq!(Filter::eq("a", 1).and(Filter::Never), Filter::Never);
        assert_eq!(Filter::all(Vec::new()), Filter::Always);
        assert_eq!(Filter::any(Vec::new()), Filter::Never);
        assert_eq!(Filter::eq("a", 1).negate().negate(), Filter::eq("a", 1));
    }

    #[test]
    fn test_or_matches_either() {
        let filter = Filter::like("code", "X1").or(Filter::like("name", "X1"));
        assert!(filter.matches(&row(json!({"code": "AX12", "name": "b"})), &no_subquery));
        assert!(filter.matches(&row(json!({"code": "c", "name": "X1 blue"})), &no_subquery));
        assert!(!filter.matches(&row(json!({"code": "c", "name": "d"})), &no_subquery));
    }

    #[test]
    fn test_display() {
        let filter = Filter::eq("status", 1).and(Filter::eq("parent_id", Value::Null));
        assert_eq!(filter.to_string(), "(status = 1) AND (parent_id IS NULL)");
    }
}
