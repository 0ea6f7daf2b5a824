use async_trait::async_trait;
use serde_json::Value;
use tether_common::Result;
use tether_orm::Record;

use crate::stage::{PreLoad, StageContext};

/// Splits comma-delimited strings supplied for list fields, so query
/// strings such as `category_id=1,2,3` load as lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitDelimitedLists;

#[async_trait]
impl PreLoad for SplitDelimitedLists {
    async fn process(&self, ctx: &StageContext<'_>, mut raw: Record) -> Result<Record> {
        for field in ctx.schema.load_fields().filter(|f| f.kind().is_list()) {
            let items: Vec<Value> = match raw.get(field.name()) {
                Some(Value::String(text)) if text.is_empty() => Vec::new(),
                Some(Value::String(text)) => text.split(',').map(|s| Value::from(s.trim())).collect(),
                _ => continue,
            };
            raw.insert(field.name().to_string(), Value::Array(items));
        }
        Ok(raw)
    }
}
