//! [`Store`] backed by a PostgreSQL pool.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::{Arguments, Postgres, Row};
use tether_common::{Result, TetherError};
use tracing::{debug, instrument};

use super::connection::Connection;
use super::decode::row_to_record;
use super::sql::{self, Statement};
use crate::filter::{Filter, Select};
use crate::record::Record;
use crate::registry::EntityType;
use crate::store::{Store, Transaction};

fn arguments(params: &[Value]) -> Result<PgArguments> {
    let mut args = PgArguments::default();
    for value in params {
        let added = match value {
            Value::Null => args.add(Option::<String>::None),
            Value::Bool(b) => args.add(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => args.add(i),
                None => args.add(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => args.add(s.clone()),
            Value::Array(_) | Value::Object(_) => args.add(sqlx::types::Json(value.clone())),
        };
        added.map_err(|e| TetherError::Query(format!("Failed to bind parameter: {}", e)))?;
    }
    Ok(args)
}

fn query(stmt: &Statement) -> Result<sqlx::query::Query<'_, Postgres, PgArguments>> {
    Ok(sqlx::query_with(&stmt.sql, arguments(&stmt.params)?))
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    conn: Connection,
}

impl PgStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self, ty, select), fields(table = ty.table()))]
    async fn fetch(&self, ty: &EntityType, select: &Select) -> Result<Vec<Record>> {
        let stmt = sql::select(ty, select)?;
        debug!(sql = %stmt.sql, "fetch");
        let rows = query(&stmt)?.fetch_all(self.conn.pool()).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn count(&self, ty: &EntityType, filter: &Filter) -> Result<u64> {
        let stmt = sql::count(ty, filter)?;
        let row = query(&stmt)?.fetch_one(self.conn.pool()).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.conn.pool().begin().await?;
        debug!("Started transaction");
        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }
}

/// Open PostgreSQL transaction. Dropping it unfinished rolls back.
pub struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn tx(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or(TetherError::TransactionClosed)
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn fetch(&mut self, ty: &EntityType, select: &Select) -> Result<Vec<Record>> {
        let stmt = sql::select(ty, select)?;
        let tx = self.tx()?;
        let rows = query(&stmt)?.fetch_all(&mut **tx).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn insert(&mut self, ty: &EntityType, values: &Record) -> Result<Record> {
        let stmt = sql::insert(ty, values)?;
        let tx = self.tx()?;
        let row = query(&stmt)?.fetch_one(&mut **tx).await?;
        row_to_record(&row)
    }

    async fn update(
        &mut self,
        ty: &EntityType,
        id: i64,
        changes: &Record,
    ) -> Result<Option<Record>> {
        let stmt = sql::update(ty, id, changes)?;
        let tx = self.tx()?;
        let row = query(&stmt)?.fetch_optional(&mut **tx).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn update_where(
        &mut self,
        ty: &EntityType,
        filter: &Filter,
        changes: &Record,
    ) -> Result<u64> {
        let Some(stmt) = sql::update_where(ty, filter, changes)? else {
            return Ok(0);
        };
        let tx = self.tx()?;
        let done = query(&stmt)?.execute(&mut **tx).await?;
        Ok(done.rows_affected())
    }

    async fn delete_where(&mut self, ty: &EntityType, filter: &Filter) -> Result<u64> {
        let stmt = sql::delete_where(ty, filter)?;
        let tx = self.tx()?;
        let done = query(&stmt)?.execute(&mut **tx).await?;
        Ok(done.rows_affected())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(TetherError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(TetherError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }
}
