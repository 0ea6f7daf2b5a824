//! Row representation shared by every store.

use serde_json::{Map, Value};

/// Name of the primary key column every entity carries.
pub const PRIMARY_KEY: &str = "id";

/// A single stored row: column name to JSON value.
pub type Record = Map<String, Value>;

/// Reads the primary key of a record, if present and integral.
pub fn record_id(record: &Record) -> Option<i64> {
    record.get(PRIMARY_KEY).and_then(Value::as_i64)
}

/// Loose equality used when comparing stored values with filter operands.
///
/// Numbers compare by value regardless of integer/float representation.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id() {
        let mut record = Record::new();
        assert_eq!(record_id(&record), None);
        record.insert("id".into(), json!(3));
        assert_eq!(record_id(&record), Some(3));
        record.insert("id".into(), json!("3"));
        assert_eq!(record_id(&record), None);
    }

    #[test]
    fn test_values_equal_numbers() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!(2)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!(null), &json!(null)));
    }
}
