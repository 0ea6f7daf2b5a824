//! Catalog entity declarations.

use tether_common::Result;
use tether_orm::{ColumnDef, EntityDecl, Registry, RegistryBuilder, RelationDescriptor};

pub const CATEGORIES: &str = "Categories";
pub const BRAND: &str = "Brand";
pub const SPU: &str = "Spu";
pub const SKU: &str = "Sku";
pub const OPTIONS: &str = "ProductSpecificationOptions";
pub const VALUES: &str = "ProductSpecificationValues";
pub const SPECIFICATION: &str = "ProductSpecification";

/// `status` (1 = enabled), `create_time` and `update_time`.
fn recording() -> [ColumnDef; 3] {
    [
        ColumnDef::integer("status").default_value(1),
        ColumnDef::timestamp("create_time").default_now(),
        ColumnDef::timestamp("update_time").default_now().on_update_now(),
    ]
}

/// Declares every catalog entity on `builder`.
pub fn declare(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .declare(
            EntityDecl::new(CATEGORIES, "categories")
                .columns(recording())
                .column(ColumnDef::integer("parent_id").nullable().references("categories"))
                .column(ColumnDef::text("name"))
                .relation("parent", RelationDescriptor::to_one(CATEGORIES))
                .relation("children", RelationDescriptor::to_many(CATEGORIES))
                .relation("spus", RelationDescriptor::to_many(SPU)),
        )
        .declare(
            EntityDecl::new(BRAND, "brands")
                .columns(recording())
                .column(ColumnDef::text("name"))
                .relation("spus", RelationDescriptor::to_many(SPU)),
        )
        .declare(
            EntityDecl::new(SPU, "spu")
                .columns(recording())
                .column(ColumnDef::text("name"))
                .column(ColumnDef::integer("category_id").nullable().references("categories"))
                .column(ColumnDef::integer("brand_id").nullable().references("brands"))
                .column(ColumnDef::text("information").nullable())
                .relation("skus", RelationDescriptor::to_many(SKU))
                .relation("options", RelationDescriptor::to_many(OPTIONS))
                .relation("category", RelationDescriptor::to_one(CATEGORIES))
                .relation("brand", RelationDescriptor::to_one(BRAND)),
        )
        .declare(
            EntityDecl::new(SKU, "sku")
                .columns(recording())
                .column(ColumnDef::text("name"))
                .column(ColumnDef::text("code"))
                .column(ColumnDef::float("price").nullable())
                .column(ColumnDef::float("purchase_price").nullable())
                .column(ColumnDef::integer("spu_id").nullable().references("spu"))
                .relation("spu", RelationDescriptor::to_one(SPU))
                .relation(
                    "options",
                    RelationDescriptor::to_many_via_join(OPTIONS, SPECIFICATION),
                ),
        )
        .declare(
            EntityDecl::new(OPTIONS, "product_specification_options")
                .columns(recording())
                .column(ColumnDef::integer("spu_id").nullable().references("spu"))
                .column(ColumnDef::text("option_name").nullable())
                .relation("spu", RelationDescriptor::to_one(SPU))
                .relation("values", RelationDescriptor::to_many(VALUES)),
        )
        .declare(
            EntityDecl::new(VALUES, "product_specification_values")
                .columns(recording())
                .column(
                    ColumnDef::integer("option_id")
                        .nullable()
                        .references("product_specification_options"),
                )
                .column(ColumnDef::text("value_name").nullable())
                .relation("option", RelationDescriptor::to_one(OPTIONS)),
        )
        .declare(
            EntityDecl::new(SPECIFICATION, "product_specifications")
                .column(ColumnDef::integer("sku_id").nullable().references("sku"))
                .column(
                    ColumnDef::integer("option_id")
                        .nullable()
                        .references("product_specification_options"),
                )
                .column(
                    ColumnDef::integer("value_id")
                        .nullable()
                        .references("product_specification_values"),
                ),
        )
}

/// Registry holding only the catalog entities.
pub fn registry() -> Result<Registry> {
    declare(Registry::builder()).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_orm::RelationKind;

    #[test]
    fn test_registry_resolves_every_relation() {
        let registry = registry().unwrap();
        let spu = registry.get(SPU).unwrap();
        assert_eq!(spu.relation("category").unwrap().fk, "category_id");
        assert_eq!(spu.relation("skus").unwrap().fk, "spu_id");

        let sku = registry.get(SKU).unwrap();
        let options = sku.relation("options").unwrap();
        assert_eq!(options.kind, RelationKind::ToManyViaJoin);
        let join = options.join.as_ref().unwrap();
        assert_eq!(join.owner_fk, "sku_id");
        assert_eq!(join.target_fk, "option_id");
    }

    #[test]
    fn test_recording_columns() {
        let registry = registry().unwrap();
        let brand = registry.get(BRAND).unwrap();
        assert!(brand.column("update_time").unwrap().on_update.is_some());
        assert!(brand.has_column("status"));
        let spec = registry.get(SPECIFICATION).unwrap();
        assert!(!spec.has_column("status"));
    }
}
