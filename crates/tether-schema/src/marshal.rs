//! Scalar conversion between wire values and typed values.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

use crate::field::FieldKind;

pub const MISSING: &str = "Missing data for required field.";
pub const NULL: &str = "Field may not be null.";
const NOT_INTEGER: &str = "Not a valid integer.";
const NOT_NUMBER: &str = "Not a valid number.";
const NOT_STRING: &str = "Not a valid string.";
const NOT_BOOLEAN: &str = "Not a valid boolean.";
const NOT_DATETIME: &str = "Not a valid datetime.";
const NOT_LIST: &str = "Not a valid list.";
const NOT_NESTED: &str = "Invalid input type.";

fn integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn boolean(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "on" => Some(true),
            "false" | "f" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn datetime(raw: &Value) -> Option<String> {
    let text = raw.as_str()?;
    let parsed = match DateTime::parse_from_rfc3339(text) {
        Ok(dt) => dt.with_timezone(&Utc),
        // Naive timestamps are taken as UTC
        Err(_) => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()?
            .and_utc(),
    };
    Some(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Converts one non-null input value to its typed form, or returns the
/// message to report for the field.
pub fn unmarshal(kind: &FieldKind, raw: &Value) -> Result<Value, String> {
    match kind {
        FieldKind::Integer => integer(raw).map(Value::from).ok_or(NOT_INTEGER.into()),
        FieldKind::Float => float(raw)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(NOT_NUMBER.into()),
        FieldKind::String => match raw {
            Value::String(_) => Ok(raw.clone()),
            _ => Err(NOT_STRING.into()),
        },
        FieldKind::Boolean => boolean(raw).map(Value::Bool).ok_or(NOT_BOOLEAN.into()),
        FieldKind::DateTime => datetime(raw).map(Value::String).ok_or(NOT_DATETIME.into()),
        FieldKind::List(inner) => {
            let items = raw.as_array().ok_or_else(|| NOT_LIST.to_string())?;
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    unmarshal(inner, item).map_err(|message| format!("Item {}: {}", idx, message))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        FieldKind::Nested(nested) => match (nested.many, raw) {
            (false, Value::Object(_)) => Ok(raw.clone()),
            (true, Value::Array(items)) if items.iter().all(Value::is_object) => Ok(raw.clone()),
            _ => Err(NOT_NESTED.into()),
        },
    }
}

/// Serializes a stored attribute for output. Values that do not fit the
/// declared kind are passed through unchanged.
pub fn marshal(kind: &FieldKind, value: &Value) -> Value {
    match (kind, value) {
        (_, Value::Null) => Value::Null,
        (FieldKind::Integer, v) => integer(v).map(Value::from).unwrap_or_else(|| v.clone()),
        (FieldKind::Float, v) => float(v)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| v.clone()),
        (FieldKind::Boolean, v) => boolean(v).map(Value::Bool).unwrap_or_else(|| v.clone()),
        (FieldKind::List(inner), Value::Array(items)) => {
            Value::Array(items.iter().map(|item| marshal(inner, item)).collect())
        }
        (_, v) => v.clone(),
    }
}
