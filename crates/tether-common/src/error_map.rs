//! Aggregated validation messages.
//!
//! One `ErrorMap` collects every problem found during a single pipeline run,
//! keyed by field name. Cross-field messages go under [`SCHEMA_KEY`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Result, TetherError};

/// Key used for schema-level (cross-field) messages.
pub const SCHEMA_KEY: &str = "_schema";

/// Mapping from field name to its ordered list of messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorMap {
    entries: BTreeMap<String, Vec<String>>,
}

impl ErrorMap {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.entries
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Append a schema-level message
    pub fn add_schema(&mut self, message: impl Into<String>) {
        self.add(SCHEMA_KEY, message);
    }

    /// Fold an error raised by a stage into the aggregate.
    ///
    /// Returns the error back when it is not a validation-class error, so the
    /// caller can propagate it.
    pub fn absorb(&mut self, err: TetherError) -> Option<TetherError> {
        match err {
            TetherError::Validation(other) => self.merge(other),
            TetherError::Schema(message) => self.add_schema(message),
            TetherError::FieldValidation { field, message } => self.add(field, message),
            TetherError::ForeignKeyNotFound { field, missing } => {
                let message = if missing.is_empty() {
                    "Foreign key or primary key not found.".to_string()
                } else {
                    format!("Foreign key or primary key not found: {:?}", missing)
                };
                self.add(field, message)
            }
            other => return Some(other),
        }
        None
    }

    /// Merge another aggregate into this one, keeping message order.
    pub fn merge(&mut self, other: ErrorMap) {
        for (field, messages) in other.entries {
            self.entries.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fields (including the schema key) carrying messages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.entries.get(field).map(|v| v.as_slice())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.entries.contains_key(field)
    }

    pub fn schema_messages(&self) -> &[String] {
        self.get(SCHEMA_KEY).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    /// Ok if empty, otherwise the aggregate as a [`TetherError::Validation`].
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TetherError::Validation(self))
        }
    }
}

impl fmt::Display for ErrorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}
