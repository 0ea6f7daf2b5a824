//! Pipeline stage traits.
//!
//! A schema run is a fixed sequence of stages; every stage may await
//! storage. The traits mirror the stage order:
//!
//! ```text
//! load:  PreLoad* -> unmarshal -> FieldValidator* -> SchemaValidator* -> PostLoad*
//! dump:  PreDump* -> marshal -> PostDump*
//! ```

use async_trait::async_trait;
use serde_json::Value;
use tether_common::{Result, TetherError};
use tether_orm::{Db, Entity, Filter, Record};

use crate::schema::Schema;

/// Context handed to every stage of one run.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub db: &'a Db,
    pub schema: &'a Schema,
}

impl<'a> StageContext<'a> {
    pub fn new(db: &'a Db, schema: &'a Schema) -> Self {
        Self { db, schema }
    }
}

// ============================================================================
// Validators
// ============================================================================

/// Per-field check, run on unmarshalled values.
///
/// Errors other than [`TetherError::FieldValidation`] that are still
/// validation-class are reported under the field being validated.
#[async_trait]
pub trait FieldValidator: Send + Sync {
    async fn validate(&self, ctx: &StageContext<'_>, field: &str, value: &Value) -> Result<()>;
}

/// Cross-field check over the whole unmarshalled record.
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    /// Skip this validator when any field already failed.
    fn skip_on_field_errors(&self) -> bool {
        false
    }

    async fn validate(&self, ctx: &StageContext<'_>, data: &Record) -> Result<()>;
}

/// Build a field error
pub fn field_error(field: &str, message: impl Into<String>) -> TetherError {
    TetherError::FieldValidation {
        field: field.to_string(),
        message: message.into(),
    }
}

// ============================================================================
// Processors
// ============================================================================

/// Rewrites raw input before unmarshalling.
#[async_trait]
pub trait PreLoad: Send + Sync {
    async fn process(&self, ctx: &StageContext<'_>, raw: Record) -> Result<Record>;
}

/// Runs after validation succeeded; may replace the run's output.
#[async_trait]
pub trait PostLoad: Send + Sync {
    async fn process(&self, ctx: &StageContext<'_>, state: &mut LoadState) -> Result<()>;
}

/// Prepares the entities of one dump call before marshalling.
#[async_trait]
pub trait PreDump: Send + Sync {
    async fn process(&self, ctx: &StageContext<'_>, items: &mut [Entity]) -> Result<()>;
}

/// Adjusts each marshalled item.
#[async_trait]
pub trait PostDump: Send + Sync {
    async fn process(&self, ctx: &StageContext<'_>, output: &mut Record) -> Result<()>;
}

// ============================================================================
// Load state
// ============================================================================

/// Deferred association recorded by key checking and applied by
/// materialization: `column` on each `ids` row of `target` is set to the
/// materialized entity's id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLink {
    pub field: String,
    pub target: String,
    pub column: String,
    pub ids: Vec<i64>,
}

/// What a load run produced.
#[derive(Debug, Clone)]
pub enum Loaded {
    /// Validated data that no processor turned into something else
    Data(Record),
    Entity(Box<Entity>),
    Entities(Vec<Entity>),
    Count(u64),
}

impl Loaded {
    pub fn as_data(&self) -> Option<&Record> {
        match self {
            Loaded::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Loaded::Entity(entity) => Some(*entity),
            _ => None,
        }
    }

    pub fn into_entities(self) -> Option<Vec<Entity>> {
        match self {
            Loaded::Entities(entities) => Some(entities),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Loaded::Count(n) => Some(*n),
            _ => None,
        }
    }
}

/// Mutable state threaded through post-load processors.
#[derive(Debug, Clone)]
pub struct LoadState {
    pub data: Record,
    pub links: Vec<PendingLink>,
    /// Composed query predicate, if a processor built one
    pub filter: Option<Filter>,
    pub output: Option<Loaded>,
}

impl LoadState {
    pub fn new(data: Record) -> Self {
        Self {
            data,
            links: Vec::new(),
            filter: None,
            output: None,
        }
    }

    /// Composed filter, or match-all when none was built.
    pub fn filter(&self) -> Filter {
        self.filter.clone().unwrap_or_default()
    }

    pub fn into_loaded(self) -> Loaded {
        self.output.unwrap_or(Loaded::Data(self.data))
    }
}

/// Outcome of a non-strict load.
#[derive(Debug)]
pub struct LoadResult {
    /// Best-effort output; absent when a processor failed mid-way
    pub data: Option<Loaded>,
    pub errors: tether_common::ErrorMap,
}

impl LoadResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts to a strict outcome.
    pub fn into_result(self) -> Result<Loaded> {
        if !self.errors.is_empty() {
            return Err(TetherError::Validation(self.errors));
        }
        self.data
            .ok_or_else(|| TetherError::Internal("load produced no output".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_common::ErrorMap;

    #[test]
    fn test_state_defaults_to_data() {
        let data = json!({"name": "x"}).as_object().cloned().unwrap();
        let state = LoadState::new(data.clone());
        assert_eq!(state.filter(), Filter::Always);
        assert_eq!(state.into_loaded().as_data(), Some(&data));
    }

    #[test]
    fn test_result_with_errors_is_validation() {
        let mut errors = ErrorMap::new();
        errors.add("name", "Missing data for required field.");
        let result = LoadResult { data: None, errors };
        assert!(!result.is_valid());
        assert!(matches!(result.into_result(), Err(TetherError::Validation(_))));
    }
}
