//! Built-in field validators.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tether_common::{Result, TetherError};
use tether_orm::{record_id, Filter, Record, PRIMARY_KEY};

use crate::stage::{field_error, FieldValidator, SchemaValidator, StageContext};

// ============================================================================
// Length
// ============================================================================

/// Character count of a string, or item count of a list.
#[derive(Debug, Clone, Copy, Default)]
pub struct Length {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl Length {
    pub fn between(min: usize, max: usize) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn max(max: usize) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub fn min(min: usize) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    fn message(&self) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("Length must be between {} and {}.", min, max),
            (Some(min), None) => format!("Shorter than minimum length {}.", min),
            (None, Some(max)) => format!("Longer than maximum length {}.", max),
            (None, None) => String::new(),
        }
    }
}

#[async_trait]
impl FieldValidator for Length {
    async fn validate(&self, _ctx: &StageContext<'_>, field: &str, value: &Value) -> Result<()> {
        let len = match value {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            _ => return Ok(()),
        };
        let too_short = self.min.is_some_and(|min| len < min);
        let too_long = self.max.is_some_and(|max| len > max);
        if too_short || too_long {
            return Err(field_error(field, self.message()));
        }
        Ok(())
    }
}

// ============================================================================
// Range
// ============================================================================

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }
}

#[async_trait]
impl FieldValidator for Range {
    async fn validate(&self, _ctx: &StageContext<'_>, field: &str, value: &Value) -> Result<()> {
        let Some(n) = value.as_f64() else {
            return Ok(());
        };
        match (self.min, self.max) {
            (Some(min), Some(max)) if n < min || n > max => Err(field_error(
                field,
                format!("Must be between {} and {}.", min, max),
            )),
            (Some(min), None) if n < min => {
                Err(field_error(field, format!("Must be at least {}.", min)))
            }
            (None, Some(max)) if n > max => {
                Err(field_error(field, format!("Must be at most {}.", max)))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// OneOf / Pattern
// ============================================================================

#[derive(Debug, Clone)]
pub struct OneOf(pub Vec<Value>);

#[async_trait]
impl FieldValidator for OneOf {
    async fn validate(&self, _ctx: &StageContext<'_>, field: &str, value: &Value) -> Result<()> {
        if self.0.contains(value) {
            Ok(())
        } else {
            Err(field_error(field, "Not a valid choice."))
        }
    }
}

/// String must match the pattern.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Pattern)
            .map_err(|e| TetherError::Internal(format!("Invalid pattern '{}': {}", pattern, e)))
    }
}

#[async_trait]
impl FieldValidator for Pattern {
    async fn validate(&self, _ctx: &StageContext<'_>, field: &str, value: &Value) -> Result<()> {
        match value.as_str() {
            Some(text) if !self.0.is_match(text) => {
                Err(field_error(field, "String does not match expected pattern."))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Unique
// ============================================================================

/// No other row of the schema's entity may hold the same `column` value.
/// The row named by the data's `id` is excluded, so updates keep their own
/// value.
#[derive(Debug, Clone)]
pub struct UniqueColumn {
    column: String,
}

impl UniqueColumn {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

#[async_trait]
impl SchemaValidator for UniqueColumn {
    fn skip_on_field_errors(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &StageContext<'_>, data: &Record) -> Result<()> {
        let value = match data.get(&self.column) {
            None | Some(Value::Null) => return Ok(()),
            Some(value) => value.clone(),
        };
        let mut filter = Filter::eq(self.column.as_str(), value);
        if let Some(id) = record_id(data) {
            filter = filter.and(Filter::eq(PRIMARY_KEY, id).negate());
        }
        if ctx.db.count(ctx.schema.entity(), &filter).await? > 0 {
            return Err(field_error(&self.column, "Must be unique."));
        }
        Ok(())
    }
}
