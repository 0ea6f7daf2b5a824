//! Storage seam.
//!
//! Relation handles and pipeline processors only talk to a [`Store`]; the
//! in-memory and PostgreSQL backends both implement it.

use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use tether_common::{Result, TetherError};
use tracing::{debug, warn};

use crate::filter::{Filter, Select};
use crate::record::Record;
use crate::registry::EntityType;

/// Read access plus transaction creation.
#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch(&self, ty: &EntityType, select: &Select) -> Result<Vec<Record>>;

    async fn count(&self, ty: &EntityType, filter: &Filter) -> Result<u64>;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// A unit of work. Writes become visible to other readers only on commit.
///
/// Every method fails with [`TetherError::TransactionClosed`] once the
/// transaction was committed or rolled back.
#[async_trait]
pub trait Transaction: Send {
    async fn fetch(&mut self, ty: &EntityType, select: &Select) -> Result<Vec<Record>>;

    /// Inserts a row and returns it as stored (with its assigned `id`).
    async fn insert(&mut self, ty: &EntityType, values: &Record) -> Result<Record>;

    /// Updates the row with `id`, returning the stored row, or `None` if absent.
    async fn update(&mut self, ty: &EntityType, id: i64, changes: &Record)
        -> Result<Option<Record>>;

    /// Applies `changes` to every row matching `filter`; returns the row count.
    async fn update_where(
        &mut self,
        ty: &EntityType,
        filter: &Filter,
        changes: &Record,
    ) -> Result<u64>;

    async fn delete_where(&mut self, ty: &EntityType, filter: &Filter) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Owned transaction with commit-or-rollback finalization.
///
/// Dropping an unfinished scope discards its writes.
pub struct TransactionScope {
    inner: Box<dyn Transaction>,
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope").finish_non_exhaustive()
    }
}

impl TransactionScope {
    pub fn new(inner: Box<dyn Transaction>) -> Self {
        Self { inner }
    }

    pub async fn commit(mut self) -> Result<()> {
        self.inner.commit().await?;
        debug!("Committed transaction");
        Ok(())
    }

    /// Rolls back; a scope that is already closed counts as rolled back.
    pub async fn rollback(mut self) -> Result<()> {
        match self.inner.rollback().await {
            Ok(()) | Err(TetherError::TransactionClosed) => {
                debug!("Rolled back transaction");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Commits when `result` is `Ok`, rolls back and returns the original
    /// error otherwise.
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed after error");
                }
                Err(err)
            }
        }
    }
}

impl Deref for TransactionScope {
    type Target = dyn Transaction;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for TransactionScope {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}
