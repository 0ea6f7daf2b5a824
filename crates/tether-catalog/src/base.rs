use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_common::Result;
use tether_orm::Record;
use tether_schema::{FieldSpec, PreLoad, Schema, SchemaBuilder, StageContext};

/// Fields every catalog schema shares: `id`, `name`, `status` and the
/// two timestamps. Catalog schemas are strict.
pub(crate) fn base(name: &str, entity: &str) -> SchemaBuilder {
    Schema::builder(name, entity)
        .strict()
        .field(FieldSpec::integer("id").key_check(entity))
        .field(FieldSpec::string("name"))
        .field(FieldSpec::integer("status"))
        .field(FieldSpec::datetime("update_time").dump_only())
        .field(FieldSpec::datetime("create_time").dump_only())
}

/// `{id, name}` view used for nested references.
pub(crate) fn summary(entity: &str) -> Arc<Schema> {
    Arc::new(
        Schema::builder(format!("{}Summary", entity), entity)
            .field(FieldSpec::integer("id"))
            .field(FieldSpec::string("name"))
            .build(),
    )
}

/// Treats a zero key in `field` as "no parent": `0` and `"0"` become null.
#[derive(Debug, Clone)]
pub struct ZeroAsNull(pub &'static str);

#[async_trait]
impl PreLoad for ZeroAsNull {
    async fn process(&self, _ctx: &StageContext<'_>, mut raw: Record) -> Result<Record> {
        let zero = match raw.get(self.0) {
            Some(Value::Number(n)) => n.as_i64() == Some(0),
            Some(Value::String(s)) => s.trim() == "0",
            _ => false,
        };
        if zero {
            raw.insert(self.0.to_string(), Value::Null);
        }
        Ok(raw)
    }
}
