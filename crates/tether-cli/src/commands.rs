//! Command bodies, independent of argument parsing and the storage backend.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tether_catalog::{schema_by_name, SCHEMA_NAMES};
use tether_orm::{Db, TetherError};
use tether_schema::processors::delete_by_id;
use tether_schema::{ErrorMap, Schema};
use tracing::{debug, info};

/// What a command prints.
#[derive(Debug)]
pub enum Output {
    Ok(Value),
    /// Aggregated validation errors; the process exits non-zero.
    Invalid(ErrorMap),
}

impl Output {
    pub fn to_json(&self) -> Value {
        match self {
            Output::Ok(value) => value.clone(),
            Output::Invalid(errors) => json!({ "errors": errors }),
        }
    }
}

fn lookup(name: &str) -> Result<Schema> {
    schema_by_name(name).ok_or_else(|| {
        anyhow!(
            "Unknown schema '{}'. Available: {}",
            name,
            SCHEMA_NAMES.join(", ")
        )
    })
}

/// Schema names with the entity each one reads and writes.
pub fn list_schemas() -> Output {
    let rows = SCHEMA_NAMES
        .iter()
        .filter_map(|name| schema_by_name(name))
        .map(|schema| json!({ "schema": schema.name(), "entity": schema.entity() }))
        .collect();
    Output::Ok(Value::Array(rows))
}

/// Runs the load pipeline on a JSON object and dumps whatever it produced.
pub async fn load(db: &Db, schema_name: &str, input: &str, partial: bool) -> Result<Output> {
    let mut schema = lookup(schema_name)?;
    if partial {
        schema = schema.with_options(schema.options().with_partial(true));
    }
    let raw: Value = serde_json::from_str(input).context("Input is not valid JSON")?;
    debug!(schema = schema_name, partial, "running load");

    let result = match schema.load_value(db, raw).await {
        Ok(result) => result,
        Err(TetherError::Validation(errors)) => return Ok(Output::Invalid(errors)),
        Err(e) => return Err(e.into()),
    };
    match result.into_result() {
        Ok(loaded) => Ok(Output::Ok(schema.dump_loaded(db, loaded).await?)),
        Err(TetherError::Validation(errors)) => Ok(Output::Invalid(errors)),
        Err(e) => Err(e.into()),
    }
}

/// Fetches one row by id and dumps it through the named schema.
pub async fn dump(db: &Db, schema_name: &str, id: i64) -> Result<Output> {
    let schema = lookup(schema_name)?;
    let mut entity = db
        .get(schema.entity(), id)
        .await?
        .ok_or_else(|| anyhow!("{} {} not found", schema.entity(), id))?;
    let record = schema.dump(db, &mut entity).await?;
    Ok(Output::Ok(Value::Object(record)))
}

pub async fn delete(db: &Db, entity: &str, id: i64) -> Result<Output> {
    let removed = delete_by_id(db, entity, id).await?;
    info!(entity, id, removed, "delete finished");
    Ok(Output::Ok(json!({ "deleted": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_catalog::registry;
    use tether_orm::MemoryStore;

    fn db() -> (MemoryStore, Db) {
        let store = MemoryStore::new();
        let db = Db::new(store.clone(), registry().unwrap());
        (store, db)
    }

    /// Stored rows of an entity type, looked up through its table.
    fn rows(store: &MemoryStore, db: &Db, entity: &str) -> usize {
        let table = db.entity_type(entity).unwrap().table().to_string();
        store.rows(&table).len()
    }

    #[test]
    fn test_list_schemas_names_entities() {
        let Output::Ok(Value::Array(rows)) = list_schemas() else {
            panic!("expected a list");
        };
        assert_eq!(rows.len(), SCHEMA_NAMES.len());
        assert_eq!(rows[0], json!({"schema": "CateList", "entity": "Categories"}));
    }

    #[tokio::test]
    async fn test_load_creates_and_dumps() {
        let (store, db) = db();
        let out = load(&db, "CateDetail", r#"{"name": "Felines"}"#, false)
            .await
            .unwrap();
        let Output::Ok(value) = out else {
            panic!("expected success, got {out:?}");
        };
        assert_eq!(value["name"], "Felines");
        assert_eq!(value["id"], 1);
        assert_eq!(rows(&store, &db, "Categories"), 1);
    }

    #[tokio::test]
    async fn test_load_reports_validation_errors() {
        let (store, db) = db();
        let out = load(&db, "CateDetail", r#"{"name": "Felines", "parent_id": 999999}"#, false)
            .await
            .unwrap();
        let Output::Invalid(errors) = &out else {
            panic!("expected errors, got {out:?}");
        };
        assert!(errors.contains("parent_id"));
        assert!(out.to_json()["errors"]["parent_id"].is_array());
        assert_eq!(rows(&store, &db, "Categories"), 0);
    }

    #[tokio::test]
    async fn test_unknown_schema_and_bad_json() {
        let (_, db) = db();
        let err = load(&db, "Nope", "{}", false).await.unwrap_err();
        assert!(err.to_string().contains("Unknown schema 'Nope'"));

        let err = load(&db, "CateList", "{not json", false).await.unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_dump_and_delete_by_id() {
        let (store, db) = db();
        load(&db, "BrandDetail", r#"{"name": "Acme"}"#, false)
            .await
            .unwrap();
        assert_eq!(rows(&store, &db, "Brand"), 1);

        let Output::Ok(value) = dump(&db, "BrandDetail", 1).await.unwrap() else {
            panic!("expected a dump");
        };
        assert_eq!(value["name"], "Acme");
        assert_eq!(value["spus"], json!([]));

        let Output::Ok(value) = delete(&db, "Brand", 1).await.unwrap() else {
            panic!("expected a delete result");
        };
        assert_eq!(value, json!({"deleted": true}));
        assert_eq!(rows(&store, &db, "Brand"), 0);
        assert!(dump(&db, "BrandDetail", 1).await.is_err());
    }
}
