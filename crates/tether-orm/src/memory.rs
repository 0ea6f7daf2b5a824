//! In-memory [`Store`] used by tests and examples.
//!
//! Transactions work on a private copy of the tables and publish the tables
//! they touched on commit. Ids come from per-table sequences that, like
//! database sequences, are not rewound by a rollback.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tether_common::{Result, TetherError};
use tracing::trace;

use crate::filter::{Filter, Order, Select};
use crate::record::{record_id, Record, PRIMARY_KEY};
use crate::registry::EntityType;
use crate::store::{Store, Transaction};

type Tables = HashMap<String, BTreeMap<i64, Record>>;

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    sequences: Mutex<HashMap<String, i64>>,
    queries: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

/// Shared-state in-memory store. Clones see the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("tables", &self.shared.tables.lock().len())
            .field("queries", &self.query_count())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read queries served so far (fetches and counts).
    pub fn query_count(&self) -> usize {
        self.shared.queries.load(AtomicOrdering::SeqCst)
    }

    pub fn reset_query_count(&self) {
        self.shared.queries.store(0, AtomicOrdering::SeqCst);
    }

    /// Makes every subsequent write to `table` fail.
    pub fn fail_writes_to(&self, table: &str) {
        self.shared.failing.lock().insert(table.to_string());
    }

    pub fn clear_failures(&self) {
        self.shared.failing.lock().clear();
    }

    /// Inserts a committed row directly, outside any transaction.
    pub fn seed(&self, ty: &EntityType, values: Record) -> Record {
        let id = match record_id(&values) {
            Some(id) => {
                let mut sequences = self.shared.sequences.lock();
                let seq = sequences.entry(ty.table().to_string()).or_insert(0);
                *seq = (*seq).max(id);
                id
            }
            None => self.next_id(ty.table()),
        };
        let row = complete_row(ty, id, values);
        self.shared
            .tables
            .lock()
            .entry(ty.table().to_string())
            .or_default()
            .insert(id, row.clone());
        row
    }

    /// Committed rows of `table` ordered by id.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.shared
            .tables
            .lock()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn next_id(&self, table: &str) -> i64 {
        let mut sequences = self.shared.sequences.lock();
        let seq = sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    fn record_query(&self) {
        self.shared.queries.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn check_writable(&self, table: &str) -> Result<()> {
        if self.shared.failing.lock().contains(table) {
            return Err(TetherError::Database(format!(
                "write to '{}' rejected by the store",
                table
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, ty: &EntityType, select: &Select) -> Result<Vec<Record>> {
        self.record_query();
        let tables = self.shared.tables.lock();
        let rows = select_rows(&tables, ty.table(), select);
        trace!(table = ty.table(), filter = %select.filter, rows = rows.len(), "fetch");
        Ok(rows)
    }

    async fn count(&self, ty: &EntityType, filter: &Filter) -> Result<u64> {
        self.record_query();
        let tables = self.shared.tables.lock();
        Ok(matching_ids(&tables, ty.table(), filter).len() as u64)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let staged = self.shared.tables.lock().clone();
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: Some(staged),
            touched: HashSet::new(),
        }))
    }
}

/// Snapshot transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    store: MemoryStore,
    staged: Option<Tables>,
    touched: HashSet<String>,
}

impl MemoryTransaction {
    fn tables(&mut self) -> Result<&mut Tables> {
        self.staged.as_mut().ok_or(TetherError::TransactionClosed)
    }

    fn writable(&mut self, table: &str) -> Result<&mut Tables> {
        self.store.check_writable(table)?;
        self.touched.insert(table.to_string());
        self.tables()
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn fetch(&mut self, ty: &EntityType, select: &Select) -> Result<Vec<Record>> {
        self.store.record_query();
        let tables = self.tables()?;
        Ok(select_rows(tables, ty.table(), select))
    }

    async fn insert(&mut self, ty: &EntityType, values: &Record) -> Result<Record> {
        let explicit = record_id(values);
        let id = match explicit {
            Some(id) => id,
            None => self.store.next_id(ty.table()),
        };
        let tables = self.writable(ty.table())?;
        let rows = tables.entry(ty.table().to_string()).or_default();
        if rows.contains_key(&id) {
            return Err(TetherError::Conflict(format!(
                "{} with id {} already exists",
                ty.name(),
                id
            )));
        }
        let row = complete_row(ty, id, values.clone());
        rows.insert(id, row.clone());
        Ok(row)
    }

    async fn update(
        &mut self,
        ty: &EntityType,
        id: i64,
        changes: &Record,
    ) -> Result<Option<Record>> {
        let tables = self.writable(ty.table())?;
        let Some(row) = tables.get_mut(ty.table()).and_then(|rows| rows.get_mut(&id)) else {
            return Ok(None);
        };
        apply_changes(row, changes);
        Ok(Some(row.clone()))
    }

    async fn update_where(
        &mut self,
        ty: &EntityType,
        filter: &Filter,
        changes: &Record,
    ) -> Result<u64> {
        let tables = self.writable(ty.table())?;
        let ids = matching_ids(tables, ty.table(), filter);
        if let Some(rows) = tables.get_mut(ty.table()) {
            for id in &ids {
                if let Some(row) = rows.get_mut(id) {
                    apply_changes(row, changes);
                }
            }
        }
        Ok(ids.len() as u64)
    }

    async fn delete_where(&mut self, ty: &EntityType, filter: &Filter) -> Result<u64> {
        let tables = self.writable(ty.table())?;
        let ids = matching_ids(tables, ty.table(), filter);
        if let Some(rows) = tables.get_mut(ty.table()) {
            for id in &ids {
                rows.remove(id);
            }
        }
        Ok(ids.len() as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        let staged = self.staged.take().ok_or(TetherError::TransactionClosed)?;
        let mut tables = self.store.shared.tables.lock();
        for table in self.touched.drain() {
            match staged.get(&table) {
                Some(rows) => {
                    tables.insert(table, rows.clone());
                }
                None => {
                    tables.remove(&table);
                }
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.staged.take().ok_or(TetherError::TransactionClosed)?;
        self.touched.clear();
        Ok(())
    }
}

/// Fills every declared column so stored rows have a uniform shape.
fn complete_row(ty: &EntityType, id: i64, mut values: Record) -> Record {
    values.insert(PRIMARY_KEY.to_string(), Value::from(id));
    for column in ty.columns() {
        values.entry(column.name.clone()).or_insert(Value::Null);
    }
    values
}

fn apply_changes(row: &mut Record, changes: &Record) {
    for (column, value) in changes {
        if column != PRIMARY_KEY {
            row.insert(column.clone(), value.clone());
        }
    }
}

fn subquery(tables: &Tables, table: &str, column: &str, filter: &Filter) -> Vec<Value> {
    let Some(rows) = tables.get(table) else {
        return Vec::new();
    };
    let resolver = |t: &str, c: &str, f: &Filter| subquery(tables, t, c, f);
    rows.values()
        .filter(|row| filter.matches(row, &resolver))
        .filter_map(|row| row.get(column).cloned())
        .collect()
}

fn matching_ids(tables: &Tables, table: &str, filter: &Filter) -> Vec<i64> {
    let Some(rows) = tables.get(table) else {
        return Vec::new();
    };
    let resolver = |t: &str, c: &str, f: &Filter| subquery(tables, t, c, f);
    rows.iter()
        .filter(|(_, row)| filter.matches(row, &resolver))
        .map(|(id, _)| *id)
        .collect()
}

fn select_rows(tables: &Tables, table: &str, select: &Select) -> Vec<Record> {
    let Some(rows) = tables.get(table) else {
        return Vec::new();
    };
    let resolver = |t: &str, c: &str, f: &Filter| subquery(tables, t, c, f);
    let mut matched: Vec<&Record> = rows
        .values()
        .filter(|row| select.filter.matches(row, &resolver))
        .collect();
    if !select.order_by.is_empty() {
        matched.sort_by(|a, b| {
            for (column, order) in &select.order_by {
                let ord = compare_values(
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                );
                let ord = match order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
    let offset = select.offset.unwrap_or(0) as usize;
    let limit = select.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect()
}

/// Nulls sort first; mismatched types compare equal.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ColumnDef, EntityDecl, Registry};
    use serde_json::json;

    fn tag_type() -> Arc<EntityType> {
        Registry::builder()
            .declare(
                EntityDecl::new("Tag", "tags")
                    .column(ColumnDef::text("name"))
                    .column(ColumnDef::integer("weight").nullable()),
            )
            .build()
            .unwrap()
            .get("Tag")
            .unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_fills_columns() {
        let store = MemoryStore::new();
        let ty = tag_type();
        let mut tx = store.begin().await.unwrap();
        let a = tx.insert(&ty, &record(json!({"name": "a"}))).await.unwrap();
        let b = tx.insert(&ty, &record(json!({"name": "b"}))).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert_eq!(a["weight"], Value::Null);
        tx.commit().await.unwrap();
        assert_eq!(store.rows("tags").len(), 2);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_invisible() {
        let store = MemoryStore::new();
        let ty = tag_type();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&ty, &record(json!({"name": "a"}))).await.unwrap();
        assert!(store.fetch(&ty, &Select::default()).await.unwrap().is_empty());
        tx.rollback().await.unwrap();
        assert!(store.rows("tags").is_empty());
    }

    #[tokio::test]
    async fn test_closed_transaction_rejects_use() {
        let store = MemoryStore::new();
        let ty = tag_type();
        let mut tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(tx.commit().await, Err(TetherError::TransactionClosed)));
        assert!(matches!(
            tx.fetch(&ty, &Select::default()).await,
            Err(TetherError::TransactionClosed)
        ));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        let ty = tag_type();
        store.fail_writes_to("tags");
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert(&ty, &record(json!({"name": "a"}))).await.unwrap_err();
        assert!(matches!(err, TetherError::Database(_)));
    }

    #[tokio::test]
    async fn test_select_order_limit_offset() {
        let store = MemoryStore::new();
        let ty = tag_type();
        for (name, weight) in [("a", 3), ("b", 1), ("c", 2)] {
            store.seed(&ty, record(json!({"name": name, "weight": weight})));
        }
        let select = Select::default()
            .order_by("weight", Order::Desc)
            .offset(1)
            .limit(1);
        let rows = store.fetch(&ty, &select).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("c"));
        assert_eq!(store.count(&ty, &Filter::Always).await.unwrap(), 3);
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete_where() {
        let store = MemoryStore::new();
        let ty = tag_type();
        for name in ["a", "b", "c"] {
            store.seed(&ty, record(json!({"name": name})));
        }
        let mut tx = store.begin().await.unwrap();
        let changed = tx
            .update_where(&ty, &Filter::is_in("id", [1, 3]), &record(json!({"weight": 9})))
            .await
            .unwrap();
        assert_eq!(changed, 2);
        let deleted = tx.delete_where(&ty, &Filter::eq("name", "b")).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(tx.update(&ty, 2, &record(json!({"weight": 1}))).await.unwrap().is_none());
        tx.commit().await.unwrap();
        let rows = store.rows("tags");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["weight"] == json!(9)));
    }

    #[tokio::test]
    async fn test_rollback_keeps_sequence() {
        let store = MemoryStore::new();
        let ty = tag_type();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&ty, &record(json!({"name": "a"}))).await.unwrap();
        tx.rollback().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let row = tx.insert(&ty, &record(json!({"name": "b"}))).await.unwrap();
        assert_eq!(row["id"], json!(2));
    }
}
