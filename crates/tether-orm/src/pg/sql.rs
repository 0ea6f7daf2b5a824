//! SQL rendering for [`Filter`] trees and row writes.
//!
//! Values always travel as bind parameters; identifiers are validated and
//! quoted.

use serde_json::Value;
use tether_common::{Result, TetherError};
use unicode_normalization::UnicodeNormalization;

use crate::filter::{Filter, Order, Select};
use crate::record::{Record, PRIMARY_KEY};
use crate::registry::EntityType;

/// Rendered statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Quotes a SQL identifier, quoting each part of a schema-qualified name.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Validates a table or column name, allowing `schema.table`.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TetherError::Query("Identifier cannot be empty".to_string()));
    }
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(TetherError::Query(format!(
            "Invalid schema-qualified identifier '{}': must be in format 'schema.table'",
            name
        )));
    }
    parts.into_iter().try_for_each(validate_identifier_part)
}

fn validate_identifier_part(name: &str) -> Result<()> {
    // NFKC first so confusable code points cannot slip past the ASCII check
    let name: String = name.nfkc().collect();
    if name.len() > 63 {
        return Err(TetherError::Query(format!(
            "Identifier '{}' exceeds maximum length of 63",
            name
        )));
    }
    let first = name
        .chars()
        .next()
        .ok_or_else(|| TetherError::Query("Identifier part cannot be empty".to_string()))?;
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(TetherError::Query(format!(
            "Identifier '{}' must start with a letter or underscore",
            name
        )));
    }
    if let Some(ch) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(TetherError::Query(format!(
            "Identifier '{}' contains invalid character '{}'",
            name, ch
        )));
    }
    if name.to_lowercase().starts_with("pg_") {
        return Err(TetherError::Query(format!(
            "Access to PostgreSQL system catalog '{}' is not allowed",
            name
        )));
    }
    Ok(())
}

fn ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(quote_identifier(name))
}

/// Escapes LIKE metacharacters and wraps the needle for substring matching.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[derive(Default)]
struct Writer {
    params: Vec<Value>,
}

impl Writer {
    fn param(&mut self, value: Value, cast: Option<&str>) -> String {
        self.params.push(value);
        match cast {
            Some(cast) => format!("${}::{}", self.params.len(), cast),
            None => format!("${}", self.params.len()),
        }
    }

    fn filter(&mut self, filter: &Filter) -> Result<String> {
        Ok(match filter {
            Filter::Always => "TRUE".to_string(),
            Filter::Never => "FALSE".to_string(),
            Filter::Eq(column, Value::Null) => format!("{} IS NULL", ident(column)?),
            Filter::Eq(column, value) => {
                format!("{} = {}", ident(column)?, self.param(value.clone(), None))
            }
            Filter::In(_, values) if values.is_empty() => "FALSE".to_string(),
            Filter::In(column, values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| self.param(v.clone(), None))
                    .collect();
                format!("{} IN ({})", ident(column)?, placeholders.join(", "))
            }
            Filter::Like(column, needle) => format!(
                "{} LIKE {}",
                ident(column)?,
                self.param(Value::String(like_pattern(needle)), None)
            ),
            Filter::InSelect {
                column,
                table,
                select,
                filter,
            } => format!(
                "{} IN (SELECT {} FROM {} WHERE {})",
                ident(column)?,
                ident(select)?,
                ident(table)?,
                self.filter(filter)?
            ),
            Filter::And(parts) => self.join(parts, " AND ")?,
            Filter::Or(parts) => self.join(parts, " OR ")?,
            Filter::Not(inner) => format!("NOT ({})", self.filter(inner)?),
        })
    }

    fn join(&mut self, parts: &[Filter], sep: &str) -> Result<String> {
        let rendered = parts
            .iter()
            .map(|p| self.filter(p).map(|sql| format!("({})", sql)))
            .collect::<Result<Vec<_>>>()?;
        Ok(rendered.join(sep))
    }

    /// `col = $n` assignments; nulls are written as literals so no typed null
    /// is bound against a column of another type.
    fn assignments(&mut self, ty: &EntityType, changes: &Record) -> Result<Vec<String>> {
        changes
            .iter()
            .filter(|(column, _)| column.as_str() != PRIMARY_KEY)
            .map(|(column, value)| {
                let rhs = self.value(ty, column, value)?;
                Ok(format!("{} = {}", ident(column)?, rhs))
            })
            .collect()
    }

    fn value(&mut self, ty: &EntityType, column: &str, value: &Value) -> Result<String> {
        let def = ty.column(column).ok_or_else(|| {
            TetherError::Query(format!("{} has no column '{}'", ty.name(), column))
        })?;
        if value.is_null() {
            return Ok("NULL".to_string());
        }
        Ok(self.param(value.clone(), def.kind.sql_cast()))
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

pub fn select(ty: &EntityType, select: &Select) -> Result<Statement> {
    let mut w = Writer::default();
    let mut sql = format!(
        "SELECT * FROM {} WHERE {}",
        ident(ty.table())?,
        w.filter(&select.filter)?
    );
    if !select.order_by.is_empty() {
        let order = select
            .order_by
            .iter()
            .map(|(column, order)| {
                let dir = match order {
                    Order::Asc => "ASC",
                    Order::Desc => "DESC",
                };
                Ok(format!("{} {}", ident(column)?, dir))
            })
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    } else {
        sql.push_str(&format!(" ORDER BY {}", ident(PRIMARY_KEY)?));
    }
    if let Some(limit) = select.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = select.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    Ok(w.finish(sql))
}

pub fn count(ty: &EntityType, filter: &Filter) -> Result<Statement> {
    let mut w = Writer::default();
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        ident(ty.table())?,
        w.filter(filter)?
    );
    Ok(w.finish(sql))
}

pub fn insert(ty: &EntityType, values: &Record) -> Result<Statement> {
    let mut w = Writer::default();
    let table = ident(ty.table())?;
    if values.is_empty() {
        return Ok(w.finish(format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table)));
    }
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (column, value) in values {
        columns.push(ident(column)?);
        placeholders.push(w.value(ty, column, value)?);
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(w.finish(sql))
}

pub fn update(ty: &EntityType, id: i64, changes: &Record) -> Result<Statement> {
    let mut w = Writer::default();
    let table = ident(ty.table())?;
    let assignments = w.assignments(ty, changes)?;
    let key = w.param(Value::from(id), None);
    let sql = if assignments.is_empty() {
        format!("SELECT * FROM {} WHERE {} = {}", table, ident(PRIMARY_KEY)?, key)
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} = {} RETURNING *",
            table,
            assignments.join(", "),
            ident(PRIMARY_KEY)?,
            key
        )
    };
    Ok(w.finish(sql))
}

/// `None` when there is nothing to assign.
pub fn update_where(ty: &EntityType, filter: &Filter, changes: &Record) -> Result<Option<Statement>> {
    let mut w = Writer::default();
    let assignments = w.assignments(ty, changes)?;
    if assignments.is_empty() {
        return Ok(None);
    }
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        ident(ty.table())?,
        assignments.join(", "),
        w.filter(filter)?
    );
    Ok(Some(w.finish(sql)))
}

pub fn delete_where(ty: &EntityType, filter: &Filter) -> Result<Statement> {
    let mut w = Writer::default();
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        ident(ty.table())?,
        w.filter(filter)?
    );
    Ok(w.finish(sql))
}
