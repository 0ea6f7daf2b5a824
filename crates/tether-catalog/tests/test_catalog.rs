//! End-to-end catalog behaviour against the in-memory store.
//!
//! Run with: cargo test -p tether-catalog --test test_catalog

use serde_json::{json, Value};
use tether_catalog::{
    brand_detail, cate_count, cate_detail, cate_list, count_children, registry, sku_count,
    sku_detail, sku_list, spu_detail, spu_list,
};
use tether_orm::{Db, MemoryStore, Record, TetherError};
use tether_schema::processors::delete_by_id;
use tether_schema::Loaded;

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn empty() -> (MemoryStore, Db) {
    let store = MemoryStore::new();
    let db = Db::new(store.clone(), registry().unwrap());
    (store, db)
}

/// Categories: Animals (1) > Mammals (2) > Felines (3), plus Plants (4).
/// SPUs: Tee (1) and Mug (2), no category or brand. SKUs under Tee.
fn seeded() -> (MemoryStore, Db) {
    let (store, db) = empty();
    let cate = db.entity_type("Categories").unwrap();
    store.seed(&cate, record(json!({"name": "Animals", "parent_id": null, "status": 1})));
    store.seed(&cate, record(json!({"name": "Mammals", "parent_id": 1, "status": 1})));
    store.seed(&cate, record(json!({"name": "Felines", "parent_id": 2, "status": 1})));
    store.seed(&cate, record(json!({"name": "Plants", "parent_id": null, "status": 1})));

    let spu = db.entity_type("Spu").unwrap();
    store.seed(&spu, record(json!({"name": "Tee", "category_id": null, "brand_id": null})));
    store.seed(&spu, record(json!({"name": "Mug", "category_id": null, "brand_id": null})));

    let sku = db.entity_type("Sku").unwrap();
    store.seed(
        &sku,
        record(json!({"name": "Tee red", "code": "TR-01", "price": 9.5, "purchase_price": 4.0, "spu_id": 1})),
    );
    store.seed(
        &sku,
        record(json!({"name": "Tee blue", "code": "TB-01", "price": 9.5, "purchase_price": 4.0, "spu_id": 1})),
    );
    store.reset_query_count();
    (store, db)
}

async fn load(schema: tether_schema::Schema, db: &Db, input: Value) -> tether_schema::Result<Loaded> {
    schema.load(db, record(input)).await?.into_result()
}

fn validation(err: TetherError) -> tether_schema::ErrorMap {
    match err {
        TetherError::Validation(errors) => errors,
        other => panic!("expected validation error, got {other:?}"),
    }
}

// ============================================================================
// Categories
// ============================================================================

#[tokio::test]
async fn test_create_then_dump_children() {
    let (store, db) = empty();
    let loaded = load(cate_detail(), &db, json!({"name": "Felines", "parent_id": null}))
        .await
        .unwrap();
    let mut felines = loaded.into_entity().unwrap();
    let id = felines.id().unwrap();
    assert!(!felines.is_resolved("parent"));
    assert_eq!(felines.get("status"), Some(&json!(1)));
    assert!(felines.get("create_time").unwrap().is_string());

    store.reset_query_count();
    let out = cate_detail()
        .only(["id", "name", "children"])
        .dump(&db, &mut felines)
        .await
        .unwrap();
    assert_eq!(store.query_count(), 1);
    assert_eq!(
        Value::Object(out),
        json!({"id": id, "name": "Felines", "children": []})
    );
}

#[tokio::test]
async fn test_detail_dump_nests_parent_and_children() {
    let (_, db) = seeded();
    let mut mammals = db.get("Categories", 2).await.unwrap().unwrap();
    let out = cate_detail().dump(&db, &mut mammals).await.unwrap();
    assert_eq!(out["parent"], json!({"id": 1, "name": "Animals"}));
    assert_eq!(out["children"], json!([{"id": 3, "name": "Felines"}]));
    assert_eq!(out["status"], json!(1));
    assert!(!out.contains_key("parent_id"));
    assert!(!out.contains_key("spus_ids"));
}

#[tokio::test]
async fn test_cycle_rules() {
    let (store, db) = seeded();

    // Animals > Mammals > Felines
    let err = load(cate_detail(), &db, json!({"id": 1, "name": "Animals", "parent_id": 3}))
        .await
        .unwrap_err();
    assert_eq!(
        validation(err).schema_messages(),
        ["Cannot set a descendant as parent"]
    );

    let err = load(cate_detail(), &db, json!({"id": 1, "name": "Animals", "parent_id": 1}))
        .await
        .unwrap_err();
    assert_eq!(
        validation(err).schema_messages(),
        ["An entity cannot be its own parent"]
    );

    let moved = load(cate_detail(), &db, json!({"id": 3, "name": "Felines", "parent_id": 1}))
        .await
        .unwrap()
        .into_entity()
        .unwrap();
    assert_eq!(moved.get("parent_id"), Some(&json!(1)));
    assert_eq!(store.rows("categories")[2]["parent_id"], json!(1));
}

#[tokio::test]
async fn test_zero_parent_means_root() {
    let (_, db) = seeded();
    let roots = load(cate_list(), &db, json!({"parent_id": 0, "limit": 10, "offset": 0}))
        .await
        .unwrap()
        .into_entities()
        .unwrap();
    let names: Vec<&Value> = roots.iter().map(|c| c.get("name").unwrap()).collect();
    assert_eq!(names, [&json!("Animals"), &json!("Plants")]);

    let count = load(cate_count(), &db, json!({"parent_id": "0"}))
        .await
        .unwrap();
    assert_eq!(count.count(), Some(2));

    let created = load(cate_detail(), &db, json!({"name": "Fungi", "parent_id": 0}))
        .await
        .unwrap()
        .into_entity()
        .unwrap();
    assert_eq!(created.get("parent_id"), Some(&Value::Null));
}

#[tokio::test]
async fn test_list_annotates_children_nums() {
    let (store, db) = seeded();
    let loaded = load(cate_list(), &db, json!({"page": 1, "per_page": 2}))
        .await
        .unwrap();
    store.reset_query_count();
    let out = cate_list().dump_loaded(&db, loaded).await.unwrap();
    assert_eq!(store.query_count(), 0);
    assert_eq!(
        out,
        json!([
            {"id": 1, "name": "Animals", "status": 1, "children_nums": 1,
             "create_time": null, "update_time": null},
            {"id": 2, "name": "Mammals", "status": 1, "children_nums": 1,
             "create_time": null, "update_time": null},
        ])
    );

    let felines = db.get("Categories", 3).await.unwrap().unwrap();
    assert_eq!(count_children(&db, &felines).await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_pagination_errors_are_strict() {
    let (_, db) = seeded();
    let err = load(cate_list(), &db, json!({"limit": 0, "offset": 0}))
        .await
        .unwrap_err();
    assert_eq!(validation(err).schema_messages().len(), 1);

    let err = load(cate_list(), &db, json!({"name": "a"})).await.unwrap_err();
    assert!(validation(err).schema_messages()[0].starts_with("Pagination required"));
}

// ============================================================================
// SPUs, brands and linking
// ============================================================================

#[tokio::test]
async fn test_missing_category_creates_nothing() {
    let (store, db) = seeded();
    let err = load(spu_detail(), &db, json!({"name": "Cap", "category_id": 999999}))
        .await
        .unwrap_err();
    let errors = validation(err);
    assert_eq!(
        errors.get("category_id").unwrap(),
        ["Foreign key or primary key not found: [999999]"]
    );
    assert_eq!(store.rows("spu").len(), 2);
}

#[tokio::test]
async fn test_brand_links_spus() {
    let (store, db) = seeded();
    let loaded = load(brand_detail(), &db, json!({"name": "Acme", "spus_ids": "1,2"}))
        .await
        .unwrap();
    let mut acme = loaded.into_entity().unwrap();
    assert!(store.rows("spu").iter().all(|row| row["brand_id"] == json!(1)));

    let out = brand_detail().dump(&db, &mut acme).await.unwrap();
    assert_eq!(
        out["spus"],
        json!([{"id": 1, "name": "Tee"}, {"id": 2, "name": "Mug"}])
    );

    let err = load(brand_detail(), &db, json!({"name": "Acme"}))
        .await
        .unwrap_err();
    assert_eq!(validation(err).get("name").unwrap(), ["Must be unique."]);
}

#[tokio::test]
async fn test_link_failure_rolls_back_brand() {
    let (store, db) = seeded();
    store.fail_writes_to("spu");
    let err = load(brand_detail(), &db, json!({"name": "Acme", "spus_ids": [1, 2]}))
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::Database(_)));
    assert!(store.rows("brands").is_empty());
    assert!(store.rows("spu").iter().all(|row| row["brand_id"].is_null()));
}

#[tokio::test]
async fn test_spu_detail_reparents_skus() {
    let (store, db) = seeded();
    let loaded = load(
        spu_detail(),
        &db,
        json!({"name": "Hoodie", "category_id": 3, "skus_ids": [2]}),
    )
    .await
    .unwrap();
    let mut hoodie = loaded.into_entity().unwrap();
    assert_eq!(store.rows("sku")[1]["spu_id"], json!(3));

    let out = spu_detail().dump(&db, &mut hoodie).await.unwrap();
    assert_eq!(out["category"], json!({"id": 3, "name": "Felines"}));
    assert_eq!(out["brand"], Value::Null);
    assert_eq!(out["skus"], json!([{"id": 2, "name": "Tee blue"}]));
    assert_eq!(out["information"], Value::Null);
}

#[tokio::test]
async fn test_spu_list_filters_by_category_list() {
    let (store, db) = seeded();
    let spu = db.entity_type("Spu").unwrap();
    store.seed(&spu, record(json!({"name": "Bowl", "category_id": 3, "brand_id": null})));
    store.seed(&spu, record(json!({"name": "Pot", "category_id": 4, "brand_id": null})));

    let found = load(
        spu_list(),
        &db,
        json!({"category_id": "3,4", "page": 1, "per_page": 10}),
    )
    .await
    .unwrap()
    .into_entities()
    .unwrap();
    let ids: Vec<Option<i64>> = found.iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec![Some(3), Some(4)]);
}

// ============================================================================
// SKUs
// ============================================================================

#[tokio::test]
async fn test_sku_search_matches_name_or_code() {
    let (_, db) = seeded();
    let by_code = load(sku_list(), &db, json!({"name": "TB", "limit": 10, "offset": 0}))
        .await
        .unwrap()
        .into_entities()
        .unwrap();
    assert_eq!(by_code.len(), 1);
    assert_eq!(by_code[0].get("name"), Some(&json!("Tee blue")));

    let by_name = load(sku_count(), &db, json!({"name": "Tee"})).await.unwrap();
    assert_eq!(by_name.count(), Some(2));
}

#[tokio::test]
async fn test_sku_detail_validation_and_dump() {
    let (_, db) = seeded();
    let err = load(
        sku_detail(),
        &db,
        json!({"name": "Tee green", "code": "TR-01", "price": -1, "spu_id": 1}),
    )
    .await
    .unwrap_err();
    let errors = validation(err);
    assert_eq!(errors.get("price").unwrap(), ["Must be at least 0."]);
    assert_eq!(
        errors.get("purchase_price").unwrap(),
        ["Missing data for required field."]
    );

    let loaded = load(
        sku_detail(),
        &db,
        json!({"name": "Tee green", "code": "TG-01", "price": 9.5, "purchase_price": 4, "spu_id": 1}),
    )
    .await
    .unwrap();
    let mut green = loaded.into_entity().unwrap();
    let out = sku_detail().dump(&db, &mut green).await.unwrap();
    assert_eq!(out["price"], json!(9.5));
    assert_eq!(out["purchase_price"], json!(4.0));
    assert_eq!(out["spu"]["name"], json!("Tee"));
    assert_eq!(
        out["spu"]["skus"],
        json!([
            {"id": 1, "name": "Tee red"},
            {"id": 2, "name": "Tee blue"},
            {"id": 3, "name": "Tee green"},
        ])
    );
}

#[tokio::test]
async fn test_update_refreshes_update_time() {
    let (store, db) = seeded();
    let renamed = load(cate_detail(), &db, json!({"id": 4, "name": "Flora"}))
        .await
        .unwrap()
        .into_entity()
        .unwrap();
    assert_eq!(renamed.get("name"), Some(&json!("Flora")));
    assert!(renamed.get("update_time").unwrap().is_string());
    // Seeded without timestamps; the insert default was never applied
    assert!(store.rows("categories")[3]["create_time"].is_null());
}

#[tokio::test]
async fn test_delete_by_id() {
    let (store, db) = seeded();
    assert!(delete_by_id(&db, "Sku", 2).await.unwrap());
    assert!(!delete_by_id(&db, "Sku", 2).await.unwrap());
    assert_eq!(store.rows("sku").len(), 1);
}
