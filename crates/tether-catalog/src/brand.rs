//! Brand schemas.

use tether_schema::processors::{ComposeQuery, SplitDelimitedLists};
use tether_schema::validators::{Length, UniqueColumn};
use tether_schema::{FieldKind, FieldSpec, QueryOp, Schema, SchemaBuilder};

use crate::base::{base, summary};
use crate::models::{BRAND, SPU};

fn brand_base(name: &str) -> SchemaBuilder {
    base(name, BRAND)
        .field(FieldSpec::string("name").query(QueryOp::Like))
        .pre_load(SplitDelimitedLists)
}

pub fn brand_list() -> Schema {
    brand_base("BrandList")
        .field(FieldSpec::integer("id").dump_only())
        .paginated(ComposeQuery::new())
        .build()
}

pub fn brand_count() -> Schema {
    brand_base("BrandCount")
        .field(FieldSpec::integer("id").dump_only())
        .counted(ComposeQuery::new())
        .build()
}

/// Brand names are unique; `spus_ids` moves SPUs under the brand.
pub fn brand_detail() -> Schema {
    brand_base("BrandDetail")
        .field(
            FieldSpec::list("spus_ids", FieldKind::Integer)
                .load_only()
                .key_check(SPU)
                .link("brand_id"),
        )
        .field(FieldSpec::string("name").required().validate(Length::between(1, 255)))
        .field(
            FieldSpec::nested("spus", summary(SPU))
                .many()
                .only(["id", "name"])
                .dump_only(),
        )
        .validate_schema(UniqueColumn::new("name"))
        .materialized()
        .build()
}
