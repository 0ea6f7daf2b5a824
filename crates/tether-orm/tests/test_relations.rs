//! Relation resolution against the in-memory store.
//!
//! Run with: cargo test -p tether-orm --test test_relations

use serde_json::{json, Value};
use std::sync::Arc;
use tether_orm::{
    ColumnDef, Db, Entity, EntityDecl, Filter, MemoryStore, Record, Registry, RelationDescriptor,
    TetherError,
};

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn registry() -> Registry {
    Registry::builder()
        .declare(
            EntityDecl::new("Categories", "categories")
                .column(ColumnDef::text("name"))
                .column(ColumnDef::integer("parent_id").nullable().references("categories"))
                .relation("parent", RelationDescriptor::to_one("Categories"))
                .relation("children", RelationDescriptor::to_many("Categories")),
        )
        .declare(
            EntityDecl::new("Spu", "spu")
                .column(ColumnDef::text("name"))
                .relation(
                    "options",
                    RelationDescriptor::to_many_via_join("Options", "SpuOptions"),
                ),
        )
        .declare(EntityDecl::new("Options", "options").column(ColumnDef::text("name")))
        .declare(
            EntityDecl::new("SpuOptions", "spu_options")
                .column(ColumnDef::integer("spu_id").references("spu"))
                .column(ColumnDef::integer("option_id").references("options")),
        )
        .build()
        .unwrap()
}

/// Root "Animals" (1) with children "Felines" (2) and "Canines" (3).
fn seeded() -> (MemoryStore, Db) {
    let store = MemoryStore::new();
    let db = Db::new(store.clone(), registry());
    let ty = db.entity_type("Categories").unwrap();
    store.seed(&ty, record(json!({"name": "Animals", "parent_id": null})));
    store.seed(&ty, record(json!({"name": "Felines", "parent_id": 1})));
    store.seed(&ty, record(json!({"name": "Canines", "parent_id": 1})));
    store.reset_query_count();
    (store, db)
}

#[tokio::test]
async fn test_access_before_resolve_fails() {
    let (_, db) = seeded();
    let mut animals = db.get("Categories", 1).await.unwrap().unwrap();
    let err = animals.to_many("children").unwrap_err();
    assert!(matches!(err, TetherError::RelationNotLoaded { relation } if relation == "children"));

    // Binding alone does not load either
    animals.relation("children").unwrap();
    assert!(matches!(
        animals.to_many("children"),
        Err(TetherError::RelationNotLoaded { .. })
    ));
}

#[tokio::test]
async fn test_resolve_once_then_cached() {
    let (store, db) = seeded();
    let mut animals = db.get("Categories", 1).await.unwrap().unwrap();
    store.reset_query_count();

    animals.resolve("children", &db).await.unwrap();
    assert_eq!(store.query_count(), 1);
    let names: Vec<&Value> = animals
        .to_many("children")
        .unwrap()
        .iter()
        .map(|c| c.get("name").unwrap())
        .collect();
    assert_eq!(names, vec![&json!("Felines"), &json!("Canines")]);

    // Repeated reads and resolves hit the cache
    animals.resolve("children", &db).await.unwrap();
    animals.to_many("children").unwrap();
    assert_eq!(store.query_count(), 1);
}

#[tokio::test]
async fn test_to_one_with_null_fk_is_absent() {
    let (_, db) = seeded();
    let mut animals = db.get("Categories", 1).await.unwrap().unwrap();
    animals.resolve("parent", &db).await.unwrap();
    assert!(animals.to_one("parent").unwrap().is_none());

    let mut felines = db.get("Categories", 2).await.unwrap().unwrap();
    felines.resolve("parent", &db).await.unwrap();
    assert_eq!(felines.to_one("parent").unwrap().unwrap().id(), Some(1));
}

#[tokio::test]
async fn test_rebind_picks_up_new_rows() {
    let (store, db) = seeded();
    let mut animals = db.get("Categories", 1).await.unwrap().unwrap();
    animals.resolve("children", &db).await.unwrap();
    assert_eq!(animals.to_many("children").unwrap().len(), 2);

    let ty = db.entity_type("Categories").unwrap();
    store.seed(&ty, record(json!({"name": "Birds", "parent_id": 1})));

    // Stale until rebound
    assert_eq!(animals.to_many("children").unwrap().len(), 2);
    animals.rebind();
    assert!(!animals.is_resolved("children"));
    animals.resolve("children", &db).await.unwrap();
    assert_eq!(animals.to_many("children").unwrap().len(), 3);
}

#[tokio::test]
async fn test_await_all_resolves_each_relation_once() {
    let (store, db) = seeded();
    let mut felines = db.get("Categories", 2).await.unwrap().unwrap();
    store.reset_query_count();
    felines.await_all(&db).await.unwrap();
    assert_eq!(store.query_count(), 2);
    assert!(felines.is_resolved("parent"));
    assert!(felines.is_resolved("children"));
    assert!(felines.to_many("children").unwrap().is_empty());

    felines.await_all(&db).await.unwrap();
    assert_eq!(store.query_count(), 2);
}

#[tokio::test]
async fn test_resolve_only_ignores_unknown_names() {
    let (store, db) = seeded();
    let mut felines = db.get("Categories", 2).await.unwrap().unwrap();
    store.reset_query_count();
    felines
        .resolve_only(&["parent", "name", "nope"], &db)
        .await
        .unwrap();
    assert_eq!(store.query_count(), 1);
    assert!(felines.is_resolved("parent"));
    assert!(!felines.is_resolved("children"));
}

#[tokio::test]
async fn test_unknown_relation() {
    let (_, db) = seeded();
    let mut animals = db.get("Categories", 1).await.unwrap().unwrap();
    let err = animals.relation("siblings").unwrap_err();
    assert!(matches!(err, TetherError::UnknownRelation { .. }));
}

#[tokio::test]
async fn test_filter_and_first() {
    let (store, db) = seeded();
    let mut animals = db.get("Categories", 1).await.unwrap().unwrap();
    let children = animals.relation("children").unwrap().as_many().unwrap().clone();

    let mut canines = children.filter(Filter::like("name", "Can"));
    canines.resolve(&db).await.unwrap();
    assert_eq!(canines.get().unwrap().len(), 1);

    let mut either = children.condition_filter(Filter::eq("name", "Birds"), Filter::or);
    either.resolve(&db).await.unwrap();
    assert_eq!(either.get().unwrap().len(), 2);

    store.reset_query_count();
    let first = children.first(&db).await.unwrap().unwrap();
    assert_eq!(first.id(), Some(2));
    assert_eq!(store.query_count(), 1);
    assert!(!children.is_resolved());
}

#[tokio::test]
async fn test_unsaved_owner_has_no_children() {
    let (store, db) = seeded();
    let ty = db.entity_type("Categories").unwrap();
    let mut fresh = Entity::new(Arc::clone(&ty), record(json!({"name": "Reptiles"})));
    store.reset_query_count();
    fresh.resolve("children", &db).await.unwrap();
    assert!(fresh.to_many("children").unwrap().is_empty());
    assert_eq!(fresh.to_string(), "<Categories-new>");
}

#[tokio::test]
async fn test_many_to_many_via_join() {
    let store = MemoryStore::new();
    let db = Db::new(store.clone(), registry());
    let spu = db.entity_type("Spu").unwrap();
    let options = db.entity_type("Options").unwrap();
    let join = db.entity_type("SpuOptions").unwrap();
    store.seed(&spu, record(json!({"name": "Shirt"})));
    for name in ["Red", "Blue", "Green"] {
        store.seed(&options, record(json!({ "name": name })));
    }
    store.seed(&join, record(json!({"spu_id": 1, "option_id": 1})));
    store.seed(&join, record(json!({"spu_id": 1, "option_id": 3})));

    let mut shirt = db.get("Spu", 1).await.unwrap().unwrap();
    shirt.resolve("options", &db).await.unwrap();
    let ids: Vec<Option<i64>> = shirt.to_many("options").unwrap().iter().map(Entity::id).collect();
    assert_eq!(ids, vec![Some(1), Some(3)]);
}

#[tokio::test]
async fn test_create_and_update_in_transaction() {
    let (store, db) = seeded();
    let ty = db.entity_type("Categories").unwrap();
    let mut tx = db.begin().await.unwrap();
    let values = record(json!({"name": "Birds", "parent_id": 1}));
    let mut birds = Entity::create(&mut tx, Arc::clone(&ty), values).await.unwrap();
    birds
        .update(&mut tx, record(json!({"name": "Aves"})))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(birds.get("name"), Some(&json!("Aves")));
    assert_eq!(store.rows("categories").len(), 4);
}

#[tokio::test]
async fn test_finish_rolls_back_on_error() {
    let (store, db) = seeded();
    let ty = db.entity_type("Categories").unwrap();
    let mut tx = db.begin().await.unwrap();
    let created = Entity::create(&mut tx, ty, record(json!({"name": "Fish"}))).await;
    assert!(created.is_ok());
    let failed: tether_orm::Result<()> = Err(TetherError::Schema("nope".into()));
    let err = tx.finish(failed).await.unwrap_err();
    assert!(matches!(err, TetherError::Schema(_)));
    assert_eq!(store.rows("categories").len(), 3);
}
