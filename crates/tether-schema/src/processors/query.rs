//! Query composition and the fetch/count stages that consume it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_common::Result;
use tether_orm::{Filter, Record, Select};
use tracing::debug;

use crate::field::QueryOp;
use crate::schema::Schema;
use crate::stage::{LoadState, Loaded, PostLoad, StageContext};

/// Builds the predicate for one field value, replacing the default
/// rendering of its query annotation.
pub type QueryOverride = Arc<dyn Fn(&Value) -> Filter + Send + Sync>;

/// AND-combines every query-annotated field present in the data into
/// `LoadState::filter`. No annotated field present means match-all.
#[derive(Clone, Default)]
pub struct ComposeQuery {
    overrides: BTreeMap<String, QueryOverride>,
}

impl fmt::Debug for ComposeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposeQuery")
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ComposeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom predicate for `field`.
    pub fn with_override<F>(mut self, field: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Value) -> Filter + Send + Sync + 'static,
    {
        self.overrides.insert(field.into(), Arc::new(build));
        self
    }

    pub fn compose(&self, schema: &Schema, data: &Record) -> Filter {
        Filter::all(schema.load_fields().filter_map(|field| {
            let op = field.query_op()?;
            let value = data.get(field.name())?;
            if let Some(build) = self.overrides.get(field.name()) {
                return Some(build(value));
            }
            let column = field.name();
            Some(match (op, value) {
                (_, Value::Null) => Filter::eq(column, Value::Null),
                (QueryOp::Like, Value::String(text)) => Filter::like(column, text.as_str()),
                (QueryOp::Like, other) => Filter::like(column, other.to_string()),
                (QueryOp::Equals, Value::Array(items)) => Filter::is_in(column, items.clone()),
                (QueryOp::Equals, other) => Filter::eq(column, other.clone()),
            })
        }))
    }
}

#[async_trait]
impl PostLoad for ComposeQuery {
    async fn process(&self, ctx: &StageContext<'_>, state: &mut LoadState) -> Result<()> {
        let filter = self.compose(ctx.schema, &state.data);
        debug!(%filter, "composed query");
        state.filter = Some(filter);
        Ok(())
    }
}

fn non_negative(state: &LoadState, name: &str) -> Option<u64> {
    state
        .data
        .get(name)
        .and_then(Value::as_i64)
        .and_then(|v| u64::try_from(v).ok())
}

/// Fetches the page of rows matching the composed filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchPage;

#[async_trait]
impl PostLoad for FetchPage {
    async fn process(&self, ctx: &StageContext<'_>, state: &mut LoadState) -> Result<()> {
        let mut select = Select::new(state.filter());
        if let Some(limit) = non_negative(state, "limit") {
            select = select.limit(limit);
        }
        if let Some(offset) = non_negative(state, "offset") {
            select = select.offset(offset);
        }
        let entities = ctx.db.find(ctx.schema.entity(), &select).await?;
        state.output = Some(Loaded::Entities(entities));
        Ok(())
    }
}

/// Counts the rows matching the composed filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountMatching;

#[async_trait]
impl PostLoad for CountMatching {
    async fn process(&self, ctx: &StageContext<'_>, state: &mut LoadState) -> Result<()> {
        let count = ctx.db.count(ctx.schema.entity(), &state.filter()).await?;
        state.output = Some(Loaded::Count(count));
        Ok(())
    }
}
