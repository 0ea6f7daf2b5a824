//! SPU and SKU schemas.

use std::sync::Arc;

use serde_json::Value;
use tether_orm::Filter;
use tether_schema::processors::{ComposeQuery, SplitDelimitedLists};
use tether_schema::validators::{Length, Range, UniqueColumn};
use tether_schema::{FieldKind, FieldSpec, QueryOp, Schema, SchemaBuilder};

use crate::base::{base, summary};
use crate::models::{BRAND, CATEGORIES, OPTIONS, SKU, SPU};

// ============================================================================
// SPU
// ============================================================================

fn spu_base(name: &str) -> SchemaBuilder {
    base(name, SPU)
        .field(FieldSpec::string("name").query(QueryOp::Like))
        .field(
            FieldSpec::list("category_id", FieldKind::Integer)
                .load_only()
                .query(QueryOp::Equals),
        )
        .field(
            FieldSpec::list("brand_id", FieldKind::Integer)
                .load_only()
                .query(QueryOp::Equals),
        )
}

/// Paged SPU listing; `category_id` and `brand_id` accept `1,2,3`.
pub fn spu_list() -> Schema {
    spu_base("SpuList")
        .field(FieldSpec::integer("id").dump_only())
        .pre_load(SplitDelimitedLists)
        .paginated(ComposeQuery::new())
        .build()
}

pub fn spu_count() -> Schema {
    spu_base("SpuCount")
        .field(FieldSpec::integer("id").dump_only())
        .pre_load(SplitDelimitedLists)
        .counted(ComposeQuery::new())
        .build()
}

pub fn spu_detail() -> Schema {
    spu_base("SpuDetail")
        .field(FieldSpec::integer("category_id").load_only().key_check(CATEGORIES))
        .field(FieldSpec::integer("brand_id").load_only().key_check(BRAND))
        .field(
            FieldSpec::list("options_ids", FieldKind::Integer)
                .load_only()
                .key_check(OPTIONS)
                .link("spu_id"),
        )
        .field(
            FieldSpec::list("skus_ids", FieldKind::Integer)
                .load_only()
                .key_check(SKU)
                .link("spu_id"),
        )
        .field(FieldSpec::string("name").required().validate(Length::between(1, 255)))
        .field(FieldSpec::string("information"))
        .field(
            FieldSpec::nested("skus", summary(SKU))
                .many()
                .only(["id", "name"])
                .dump_only(),
        )
        .field(
            FieldSpec::nested("category", summary(CATEGORIES))
                .only(["id", "name"])
                .dump_only(),
        )
        .field(
            FieldSpec::nested("brand", summary(BRAND))
                .only(["id", "name"])
                .dump_only(),
        )
        .materialized()
        .build()
}

// ============================================================================
// SKU
// ============================================================================

fn sku_base(name: &str) -> SchemaBuilder {
    base(name, SKU)
        .field(FieldSpec::string("name").query(QueryOp::Like))
        .field(
            FieldSpec::list("spu_id", FieldKind::Integer)
                .load_only()
                .query(QueryOp::Equals),
        )
}

/// SKU searches match `name` against the name or the code.
fn sku_query() -> ComposeQuery {
    ComposeQuery::new().with_override("name", |value: &Value| {
        let needle = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Filter::like("code", needle.as_str()).or(Filter::like("name", needle))
    })
}

pub fn sku_list() -> Schema {
    sku_base("SkuList")
        .field(FieldSpec::integer("id").dump_only())
        .pre_load(SplitDelimitedLists)
        .paginated(sku_query())
        .build()
}

pub fn sku_count() -> Schema {
    sku_base("SkuCount")
        .field(FieldSpec::integer("id").dump_only())
        .pre_load(SplitDelimitedLists)
        .counted(sku_query())
        .build()
}

/// SKU codes are unique. Dumps the owning SPU in full.
pub fn sku_detail() -> Schema {
    sku_base("SkuDetail")
        .field(FieldSpec::string("name").required())
        .field(FieldSpec::string("code").required().validate(Length::between(1, 30)))
        .field(FieldSpec::float("price").required().validate(Range::at_least(0.0)))
        .field(
            FieldSpec::float("purchase_price")
                .required()
                .validate(Range::at_least(0.0)),
        )
        .field(FieldSpec::integer("spu_id").load_only().key_check(SPU))
        .field(FieldSpec::nested("spu", Arc::new(spu_detail())).dump_only())
        .validate_schema(UniqueColumn::new("code"))
        .materialized()
        .build()
}
