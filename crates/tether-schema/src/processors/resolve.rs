use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use tether_common::Result;
use tether_orm::{Db, Entity};

use crate::field::FieldSpec;
use crate::schema::Schema;
use crate::stage::{PreDump, StageContext};

/// Resolves, for every item, the relations named by the nested output
/// fields of `schema` (restricted by `only`), then recurses into the
/// related entities with each nested field's schema.
///
/// Each level resolves all items concurrently as one batch. Relations not
/// named by an output field are left untouched.
pub fn resolve_for_dump<'a>(
    db: &'a Db,
    schema: &'a Schema,
    only: Option<&'a [String]>,
    mut items: Vec<&'a mut Entity>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let nested: Vec<&FieldSpec> = schema
            .dump_fields(only)
            .filter(|f| f.as_nested().is_some())
            .collect();
        if nested.is_empty() || items.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = nested.iter().map(|f| f.name()).collect();
        try_join_all(items.iter_mut().map(|item| item.resolve_only(&names, db))).await?;

        for field in nested {
            let Some(spec) = field.as_nested() else { continue };
            let mut related: Vec<&mut Entity> = Vec::new();
            for item in items.iter_mut() {
                if item.has_relation(field.name()) {
                    related.extend(item.loaded_mut(field.name())?.entities_mut()?);
                }
            }
            resolve_for_dump(db, schema.nested_schema(spec), spec.only.as_deref(), related).await?;
        }
        Ok(())
    }
    .boxed()
}

/// Default first pre-dump stage: resolves exactly the relations the
/// output declares.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveDumpRelations;

#[async_trait]
impl PreDump for ResolveDumpRelations {
    async fn process(&self, ctx: &StageContext<'_>, items: &mut [Entity]) -> Result<()> {
        resolve_for_dump(ctx.db, ctx.schema, None, items.iter_mut().collect()).await
    }
}
