//! PostgreSQL row to [`Record`] conversion.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use tether_common::{Result, TetherError};

use crate::record::Record;

fn extract<'r, T>(row: &'r PgRow, idx: usize, column: &str, type_name: &str) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).map_err(|e| {
        TetherError::Serialization(format!(
            "Failed to extract {} from column '{}': {}",
            type_name, column, e
        ))
    })
}

/// Converts one result row, keyed by column name.
pub fn row_to_record(row: &PgRow) -> Result<Record> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let type_name = column.type_info().name();
        let value = match type_name {
            "BOOL" => extract::<bool>(row, idx, name, type_name)?.map(Value::from),
            "INT2" => extract::<i16>(row, idx, name, type_name)?.map(Value::from),
            "INT4" => extract::<i32>(row, idx, name, type_name)?.map(Value::from),
            "INT8" => extract::<i64>(row, idx, name, type_name)?.map(Value::from),
            "FLOAT4" => extract::<f32>(row, idx, name, type_name)?.map(|v| Value::from(v as f64)),
            "FLOAT8" => extract::<f64>(row, idx, name, type_name)?.map(Value::from),
            "NUMERIC" => extract::<Decimal>(row, idx, name, type_name)?
                .and_then(|d| d.to_f64())
                .map(Value::from),
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
                extract::<String>(row, idx, name, type_name)?.map(Value::from)
            }
            "TIMESTAMPTZ" => extract::<chrono::DateTime<chrono::Utc>>(row, idx, name, type_name)?
                .map(|v| Value::from(v.to_rfc3339())),
            "TIMESTAMP" => extract::<chrono::NaiveDateTime>(row, idx, name, type_name)?
                .map(|v| Value::from(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
            "DATE" => extract::<chrono::NaiveDate>(row, idx, name, type_name)?
                .map(|v| Value::from(v.to_string())),
            "UUID" => extract::<sqlx::types::Uuid>(row, idx, name, type_name)?
                .map(|v| Value::from(v.to_string())),
            "JSON" | "JSONB" => extract::<Value>(row, idx, name, type_name)?,
            other => {
                return Err(TetherError::Serialization(format!(
                    "Unsupported column type {} for column '{}'",
                    other, name
                )))
            }
        };
        record.insert(name.to_string(), value.unwrap_or(Value::Null));
    }
    Ok(record)
}
