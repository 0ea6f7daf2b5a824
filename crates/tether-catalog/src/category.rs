//! Category tree schemas.

use async_trait::async_trait;
use futures::future::try_join_all;
use tether_common::Result;
use tether_orm::{Db, Entity, Filter};
use tether_schema::processors::{AncestorCycleCheck, ComposeQuery};
use tether_schema::validators::Length;
use tether_schema::{
    FieldKind, FieldSpec, LoadState, Loaded, PostLoad, QueryOp, Schema, SchemaBuilder,
    StageContext,
};
use tracing::debug;

use crate::base::{base, ZeroAsNull};
use crate::models::{CATEGORIES, SPU};

/// Number of direct children, in one count query.
pub async fn count_children(db: &Db, category: &Entity) -> Result<u64> {
    match category.id() {
        Some(id) => db.count(CATEGORIES, &Filter::eq("parent_id", id)).await,
        None => Ok(0),
    }
}

/// Sets `children_nums` on every listed category.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotateChildCount;

#[async_trait]
impl PostLoad for AnnotateChildCount {
    async fn process(&self, ctx: &StageContext<'_>, state: &mut LoadState) -> Result<()> {
        let Some(Loaded::Entities(categories)) = state.output.as_mut() else {
            return Ok(());
        };
        let counts =
            try_join_all(categories.iter().map(|c| count_children(ctx.db, c))).await?;
        for (category, n) in categories.iter_mut().zip(counts) {
            category.set_extra("children_nums", n);
        }
        debug!(categories = categories.len(), "annotated child counts");
        Ok(())
    }
}

fn cate_base(name: &str) -> SchemaBuilder {
    base(name, CATEGORIES)
        .field(FieldSpec::integer("id").dump_only())
        .field(FieldSpec::string("name").query(QueryOp::Like))
        .field(FieldSpec::integer("parent_id").load_only().query(QueryOp::Equals))
        .pre_load(ZeroAsNull("parent_id"))
}

/// Paged category listing. `parent_id=0` lists root categories.
pub fn cate_list() -> Schema {
    cate_base("CateList")
        .field(FieldSpec::integer("children_nums").dump_only())
        .paginated(ComposeQuery::new())
        .post_load(AnnotateChildCount)
        .build()
}

pub fn cate_count() -> Schema {
    cate_base("CateCount").counted(ComposeQuery::new()).build()
}

/// Create/update of one category; `spus_ids` reparents SPUs into it.
pub fn cate_detail() -> Schema {
    cate_base("CateDetail")
        .field(FieldSpec::integer("id").key_check(CATEGORIES))
        .field(FieldSpec::integer("parent_id").load_only().key_check(CATEGORIES))
        .field(
            FieldSpec::list("spus_ids", FieldKind::Integer)
                .load_only()
                .key_check(SPU)
                .link("category_id"),
        )
        .field(FieldSpec::string("name").required().validate(Length::between(1, 50)))
        .field(FieldSpec::nested_self("parent").only(["id", "name"]).dump_only())
        .field(
            FieldSpec::nested_self("children")
                .many()
                .only(["id", "name"])
                .dump_only(),
        )
        .validate_schema(AncestorCycleCheck::new("parent_id", "parent"))
        .materialized()
        .build()
}
