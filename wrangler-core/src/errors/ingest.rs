//! Ingestion error types
//!
//! [`RowError`] describes a single rejected row and is aggregated into the
//! merge result. [`IngestError`] aborts the whole merge or import.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{SchemaError, StorageError};

/// Why a single incoming row was rejected
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowErrorKind {
    /// A field value could not be coerced to the declared column type
    TypeCoercion {
        /// Declared column type
        expected: String,
        /// Offending value rendered as text
        value: String,
    },
    /// The row names a column the dataset does not declare
    UnknownColumn,
}

/// A rejected row; the rest of the batch continues
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Error)]
#[error("row {row_index}, column '{column}': {kind:?}")]
pub struct RowError {
    /// Zero-based index of the row in the incoming batch
    pub row_index: usize,
    /// Column whose value failed
    pub column: String,
    /// Failure detail
    #[serde(flatten)]
    pub kind: RowErrorKind,
}

impl RowError {
    pub fn type_coercion(
        row_index: usize,
        column: impl Into<String>,
        expected: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            row_index,
            column: column.into(),
            kind: RowErrorKind::TypeCoercion {
                expected: expected.into(),
                value: value.into(),
            },
        }
    }

    pub fn unknown_column(row_index: usize, column: impl Into<String>) -> Self {
        Self {
            row_index,
            column: column.into(),
            kind: RowErrorKind::UnknownColumn,
        }
    }
}

/// Merge and import errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// Target dataset does not exist
    #[error("Dataset {0} not found")]
    DatasetNotFound(i32),

    /// File with this name was already imported into the dataset
    #[error("File '{filename}' was already uploaded to dataset {dataset_id}")]
    DuplicateFile {
        /// File name
        filename: String,
        /// Dataset id
        dataset_id: i32,
    },

    /// CSV headers do not match the registered columns
    #[error("Column mismatch. Missing columns: {missing:?}, extra columns: {extra:?}")]
    HeaderMismatch {
        /// Declared but absent
        missing: Vec<String>,
        /// Present but undeclared
        extra: Vec<String>,
    },

    /// CSV headers contain the right columns in the wrong order
    #[error("Column order mismatch. Expected {expected:?}, got {actual:?}")]
    HeaderOrder {
        /// Registered order
        expected: Vec<String>,
        /// File order
        actual: Vec<String>,
    },

    /// CSV parsing failed
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Schema lookup failed
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Storage failed; nothing from the batch was written
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sea_orm::DbErr> for IngestError {
    fn from(err: sea_orm::DbErr) -> Self {
        IngestError::Storage(StorageError::Database(err))
    }
}

impl IngestError {
    /// Check if this is a client error
    pub fn is_client_error(&self) -> bool {
        match self {
            IngestError::DuplicateFile { .. }
            | IngestError::HeaderMismatch { .. }
            | IngestError::HeaderOrder { .. }
            | IngestError::Csv(_) => true,
            IngestError::Schema(err) => err.is_client_error(),
            _ => false,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            IngestError::DatasetNotFound(_) => "NOT_FOUND",
            IngestError::DuplicateFile { .. } => "DUPLICATE_FILE",
            IngestError::HeaderMismatch { .. } | IngestError::HeaderOrder { .. } => {
                "SCHEMA_MISMATCH"
            }
            IngestError::Csv(_) => "CSV_ERROR",
            IngestError::Schema(err) => err.error_code(),
            IngestError::Storage(err) => err.error_code(),
        }
    }
}
