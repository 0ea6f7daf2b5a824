//! Error types for tether

use thiserror::Error;

use crate::ErrorMap;

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

/// Unified error type for all tether operations
#[derive(Error, Debug, Clone)]
pub enum TetherError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Aggregated field- and schema-level messages of one pipeline run.
    #[error("Validation failed: {0}")]
    Validation(ErrorMap),

    /// Cross-field business rule violation, reported under the schema key.
    #[error("Schema validation error: {0}")]
    Schema(String),

    /// Single field failure raised by a validator or processor.
    #[error("Field '{field}' is invalid: {message}")]
    FieldValidation { field: String, message: String },

    /// Relation declared with an ambiguous or missing foreign key.
    #[error("Relation configuration error: {0}")]
    RelationConfiguration(String),

    /// Relation points at an entity type nobody declared.
    #[error("Unknown related type: {0}")]
    UnknownRelatedType(String),

    /// Relation data accessed before `resolve()`.
    #[error("Relation '{relation}' is not loaded, resolve it before access")]
    RelationNotLoaded { relation: String },

    #[error("Entity '{entity}' has no relation named '{relation}'")]
    UnknownRelation { entity: String, relation: String },

    /// Referenced key(s) do not exist.
    #[error("Foreign key not found for field '{field}': {missing:?}")]
    ForeignKeyNotFound { field: String, missing: Vec<i64> },

    #[error("{entity} with id {id} not found")]
    NotFound { entity: String, id: i64 },

    /// Commit or rollback on a scope that was already finalized.
    #[error("Transaction already closed")]
    TransactionClosed,

    /// Unique constraint violation (SQLSTATE 23505)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Foreign key constraint violation (SQLSTATE 23503)
    #[error("Foreign key constraint violation: {0}")]
    ForeignKey(String),
}

impl TetherError {
    /// Design-time errors that should fail fast at registration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            TetherError::RelationConfiguration(_) | TetherError::UnknownRelatedType(_)
        )
    }

    /// Errors caused by the caller's input rather than by the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TetherError::Validation(_)
                | TetherError::Schema(_)
                | TetherError::FieldValidation { .. }
                | TetherError::ForeignKeyNotFound { .. }
                | TetherError::NotFound { .. }
        )
    }

    /// Returns true if this is a constraint violation error
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, TetherError::Conflict(_) | TetherError::ForeignKey(_))
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        TetherError::Serialization(err.to_string())
    }
}

#[cfg(feature = "postgres-errors")]
impl From<sqlx::Error> for TetherError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => TetherError::Connection(err.to_string()),
            Error::Database(db_err) => {
                // See: https://www.postgresql.org/docs/current/errcodes-appendix.html
                if let Some(code) = db_err.code() {
                    let code_str: &str = &code;
                    match code_str {
                        "23505" | "23P01" => return TetherError::Conflict(err.to_string()),
                        "23503" => return TetherError::ForeignKey(err.to_string()),
                        code if code.starts_with("08") => {
                            return TetherError::Connection(err.to_string())
                        }
                        _ => {}
                    }
                }
                TetherError::Database(err.to_string())
            }
            Error::Io(_) | Error::Tls(_) | Error::Protocol(_) => {
                TetherError::Connection(err.to_string())
            }
            Error::RowNotFound => TetherError::Query("Row not found".to_string()),
            Error::ColumnNotFound(_) | Error::ColumnIndexOutOfBounds { .. } => {
                TetherError::Query(err.to_string())
            }
            Error::ColumnDecode { .. } | Error::Decode(_) => {
                TetherError::Serialization(err.to_string())
            }
            Error::PoolTimedOut => TetherError::Connection("Connection pool timed out".to_string()),
            Error::PoolClosed => TetherError::Connection("Connection pool closed".to_string()),
            _ => TetherError::Database(err.to_string()),
        }
    }
}
