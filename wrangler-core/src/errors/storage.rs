//! Storage error types
//!
//! Any of these aborts the surrounding transaction; no partial state is
//! persisted.

use thiserror::Error;

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backing table record does not exist
    #[error("Table {0} not found")]
    TableNotFound(i32),

    /// A row does not fit the physical shape of the target table
    #[error("Row does not fit table '{table}': unknown column '{column}'")]
    ShapeMismatch {
        /// Target table name
        table: String,
        /// Offending column
        column: String,
    },

    /// Destination shape for a copy lacks source columns
    #[error("Destination shape is missing source column '{0}'")]
    IncompatibleCopy(String),

    /// Could not allocate a unique table name
    #[error("Unable to allocate a unique table name for '{0}'")]
    NameExhausted(String),

    /// Row payload could not be encoded or decoded
    #[error("Row serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl StorageError {
    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::TableNotFound(_) => "NOT_FOUND",
            StorageError::ShapeMismatch { .. } | StorageError::IncompatibleCopy(_) => {
                "SHAPE_MISMATCH"
            }
            StorageError::NameExhausted(_) => "CONFLICT",
            StorageError::Serialization(_) => "SERIALIZATION_ERROR",
            StorageError::Database(_) => "DATABASE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = StorageError::ShapeMismatch {
            table: "dataset_1_people".to_string(),
            column: "age".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Row does not fit table 'dataset_1_people': unknown column 'age'"
        );
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    }

    #[test]
    fn test_database_error_code() {
        let err = StorageError::from(sea_orm::DbErr::Custom("disk full".to_string()));
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }
}
