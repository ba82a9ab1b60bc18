//! Dataset lifecycle error types
//!
//! This module provides structured error types for dataset slot and
//! enriched dataset operations exposed through [`crate::AppContext`].
//!
//! # Examples
//!
//! ```rust
//! use wrangler::errors::DatasetError;
//!
//! // Create a not found error
//! let err = DatasetError::NotFound(42);
//!
//! // Create a slot conflict
//! let err = DatasetError::SlotOccupied { slot: 2, name: "customers".to_string() };
//! assert_eq!(err.error_code(), "CONFLICT");
//! ```

use thiserror::Error;

use super::{IngestError, SchemaError, StorageError, SyncError};

/// Dataset operation errors
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Dataset not found by ID
    #[error("Dataset {0} not found")]
    NotFound(i32),

    /// Enriched dataset not found by ID
    #[error("Enriched dataset {0} not found")]
    EnrichedNotFound(i32),

    /// Slot number outside 1..=max
    #[error("Slot number must be between 1 and {max}, got {slot}")]
    InvalidSlot {
        /// Requested slot
        slot: i32,
        /// Configured maximum
        max: u8,
    },

    /// Slot already holds a dataset
    #[error("Slot {slot} is already occupied by dataset '{name}'")]
    SlotOccupied {
        /// Requested slot
        slot: i32,
        /// Name of the dataset in the slot
        name: String,
    },

    /// Dataset name already used
    #[error("Dataset '{0}' already exists")]
    AlreadyExists(String),

    /// Name is empty or too long
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Enriched datasets require a source with rows
    #[error("Dataset {0} is empty; ingest rows before enriching it")]
    EmptySource(i32),

    /// Schema validation failed
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Ingestion failed
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Initial enrichment or sync failed
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Storage failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sea_orm::DbErr> for DatasetError {
    fn from(err: sea_orm::DbErr) -> Self {
        DatasetError::Storage(StorageError::Database(err))
    }
}

impl DatasetError {
    /// Check if this is a client error (400-series)
    pub fn is_client_error(&self) -> bool {
        match self {
            DatasetError::InvalidSlot { .. }
            | DatasetError::SlotOccupied { .. }
            | DatasetError::AlreadyExists(_)
            | DatasetError::InvalidName(_)
            | DatasetError::EmptySource(_) => true,
            DatasetError::Schema(err) => err.is_client_error(),
            DatasetError::Ingest(err) => err.is_client_error(),
            _ => false,
        }
    }

    /// Check if this is a not found error (404)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DatasetError::NotFound(_) | DatasetError::EnrichedNotFound(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            DatasetError::NotFound(_) | DatasetError::EnrichedNotFound(_) => "NOT_FOUND",
            DatasetError::InvalidSlot { .. }
            | DatasetError::InvalidName(_)
            | DatasetError::EmptySource(_) => "VALIDATION_FAILED",
            DatasetError::SlotOccupied { .. } | DatasetError::AlreadyExists(_) => "CONFLICT",
            DatasetError::Schema(err) => err.error_code(),
            DatasetError::Ingest(err) => err.error_code(),
            DatasetError::Sync(err) => err.error_code(),
            DatasetError::Storage(err) => err.error_code(),
        }
    }
}
