//! Product catalog built on tether.
//!
//! Entities: a self-referential category tree, brands, SPUs (a product
//! line) and SKUs (a sellable variant), plus specification options and
//! values. Each entity has a list, a count and a detail schema.

pub mod base;
pub mod brand;
pub mod category;
pub mod goods;
pub mod models;

pub use base::ZeroAsNull;
pub use brand::{brand_count, brand_detail, brand_list};
pub use category::{cate_count, cate_detail, cate_list, count_children, AnnotateChildCount};
pub use goods::{sku_count, sku_detail, sku_list, spu_count, spu_detail, spu_list};
pub use models::{declare, registry};

use tether_schema::Schema;

/// Names accepted by [`schema_by_name`].
pub const SCHEMA_NAMES: [&str; 12] = [
    "CateList",
    "CateCount",
    "CateDetail",
    "BrandList",
    "BrandCount",
    "BrandDetail",
    "SpuList",
    "SpuCount",
    "SpuDetail",
    "SkuList",
    "SkuCount",
    "SkuDetail",
];

/// Looks a catalog schema up by name.
pub fn schema_by_name(name: &str) -> Option<Schema> {
    let schema = match name {
        "CateList" => cate_list(),
        "CateCount" => cate_count(),
        "CateDetail" => cate_detail(),
        "BrandList" => brand_list(),
        "BrandCount" => brand_count(),
        "BrandDetail" => brand_detail(),
        "SpuList" => spu_list(),
        "SpuCount" => spu_count(),
        "SpuDetail" => spu_detail(),
        "SkuList" => sku_list(),
        "SkuCount" => sku_count(),
        "SkuDetail" => sku_detail(),
        _ => return None,
    };
    Some(schema)
}
