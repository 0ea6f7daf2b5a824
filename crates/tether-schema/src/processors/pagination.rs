//! Pagination input checks and normalization.
//!
//! `limit`/`offset` wins when both pairs are supplied; `page`/`per_page` is
//! only converted when the `limit`/`offset` pair is incomplete.

use async_trait::async_trait;
use serde_json::Value;
use tether_common::{Result, TetherError};
use tether_orm::Record;

use crate::stage::{LoadState, PostLoad, SchemaValidator, StageContext};

fn int(data: &Record, name: &str) -> Option<i64> {
    data.get(name).and_then(Value::as_i64)
}

fn pair(data: &Record, a: &str, b: &str) -> Option<(i64, i64)> {
    Some((int(data, a)?, int(data, b)?))
}

/// `per_page * (page - 1)`, `None` when it does not fit an i64.
fn page_offset(page: i64, per_page: i64) -> Option<i64> {
    page.checked_sub(1)?.checked_mul(per_page)
}

fn out_of_range() -> TetherError {
    TetherError::Schema("page and per_page are too large".into())
}

/// Requires a complete, positive `limit`/`offset` or `page`/`per_page`
/// pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pagination;

#[async_trait]
impl SchemaValidator for Pagination {
    fn skip_on_field_errors(&self) -> bool {
        true
    }

    async fn validate(&self, _ctx: &StageContext<'_>, data: &Record) -> Result<()> {
        if let Some((limit, offset)) = pair(data, "limit", "offset") {
            if limit < 1 || offset < 0 {
                return Err(TetherError::Schema(
                    "limit must be at least 1 and offset must not be negative".into(),
                ));
            }
            return Ok(());
        }
        if let Some((page, per_page)) = pair(data, "page", "per_page") {
            if page < 1 || per_page < 1 {
                return Err(TetherError::Schema(
                    "page and per_page must be at least 1".into(),
                ));
            }
            if page_offset(page, per_page).is_none() {
                return Err(out_of_range());
            }
            return Ok(());
        }
        Err(TetherError::Schema(
            "Pagination required: supply limit and offset, or page and per_page".into(),
        ))
    }
}

/// Rewrites `page`/`per_page` as `limit = per_page`,
/// `offset = per_page * (page - 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizePagination;

#[async_trait]
impl PostLoad for NormalizePagination {
    async fn process(&self, _ctx: &StageContext<'_>, state: &mut LoadState) -> Result<()> {
        if pair(&state.data, "limit", "offset").is_some() {
            return Ok(());
        }
        if let Some((page, per_page)) = pair(&state.data, "page", "per_page") {
            let offset = page_offset(page, per_page).ok_or_else(out_of_range)?;
            state.data.insert("limit".into(), Value::from(per_page));
            state.data.insert("offset".into(), Value::from(offset));
        }
        Ok(())
    }
}
