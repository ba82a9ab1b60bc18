//! Schema registry error types
//!
//! Raised when a column configuration is rejected. These are always caller
//! errors: the operation fails and nothing is persisted.

use thiserror::Error;

/// Column configuration errors
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A schema must declare at least one column
    #[error("Schema must declare at least one column")]
    NoColumns,

    /// Column name is empty or whitespace
    #[error("Column name cannot be empty (position {0})")]
    EmptyColumnName(usize),

    /// Two columns share a name
    #[error("Duplicate column name '{0}'")]
    DuplicateColumnName(String),

    /// More than one column carries the duplicate-key flag
    #[error("At most one duplicate key column is allowed, found: {0:?}")]
    MultipleDuplicateKeys(Vec<String>),

    /// The duplicate key names a column that is not declared
    #[error("Duplicate key column '{0}' is not declared")]
    DuplicateKeyNotFound(String),

    /// The duplicate key argument disagrees with the flagged column
    #[error("Duplicate key '{requested}' conflicts with flagged column '{flagged}'")]
    DuplicateKeyConflict {
        /// Column named by the caller
        requested: String,
        /// Column carrying the flag
        flagged: String,
    },

    /// REAL columns cannot act as duplicate key
    #[error("Column '{0}' is REAL and cannot be used as duplicate key")]
    RealDuplicateKey(String),

    /// Unsupported column type name
    #[error("Unknown column type '{0}' (expected TEXT, INTEGER or REAL)")]
    UnknownColumnType(String),

    /// Schema cannot change once rows were ingested
    #[error("Schema for {0} is immutable once rows have been ingested")]
    Immutable(String),

    /// No schema has been registered for the owner
    #[error("No schema registered for {0}")]
    NotRegistered(String),

    /// Column referenced by an operation is not part of the schema
    #[error("Column '{0}' is not part of the schema")]
    UnknownColumn(String),

    /// Enrichment output column collides with an existing column
    #[error("Enrichment output column '{0}' collides with an existing column")]
    OutputColumnCollision(String),

    /// Unknown enrichment function identifier
    #[error("Unknown enrichment function '{0}'")]
    UnknownEnrichmentFunction(String),

    /// Enrichment specification is empty or repeats an entry
    #[error("Invalid enrichment specification: {0}")]
    InvalidEnrichmentSpec(String),

    /// Stored schema record could not be decoded
    #[error("Corrupt schema record: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl SchemaError {
    /// Check if this is a client error (input must be corrected by the caller)
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            SchemaError::Corrupt(_) | SchemaError::Database(_) | SchemaError::NotRegistered(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            SchemaError::NotRegistered(_) => "NOT_FOUND",
            SchemaError::Immutable(_) => "CONFLICT",
            SchemaError::Corrupt(_) => "CORRUPT_RECORD",
            SchemaError::Database(_) => "DATABASE_ERROR",
            _ => "SCHEMA_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_duplicate_key() {
        let err = SchemaError::RealDuplicateKey("price".to_string());
        assert_eq!(
            err.to_string(),
            "Column 'price' is REAL and cannot be used as duplicate key"
        );
        assert!(err.is_client_error());
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
    }

    #[test]
    fn test_not_registered_is_not_client_error() {
        let err = SchemaError::NotRegistered("dataset 4".to_string());
        assert!(!err.is_client_error());
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_immutable() {
        let err = SchemaError::Immutable("dataset 1".to_string());
        assert_eq!(err.error_code(), "CONFLICT");
    }
}
