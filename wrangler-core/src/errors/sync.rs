//! Enrichment synchronization error types
//!
//! Structural variants are persisted as the `SYNC_ERROR` detail of the
//! enriched dataset. They are never retried automatically.

use thiserror::Error;

use super::{SchemaError, StorageError};

/// Sync errors
#[derive(Error, Debug)]
pub enum SyncError {
    /// Enriched dataset record does not exist
    #[error("Enriched dataset {0} not found")]
    EnrichedDatasetNotFound(i32),

    /// The source dataset was deleted out from under the enriched dataset
    #[error("Source dataset {0} no longer exists")]
    SourceDatasetMissing(i32),

    /// The source dataset's table is gone
    #[error("Source table {0} no longer exists")]
    SourceTableMissing(i32),

    /// The enrichment output table is gone
    #[error("Enriched table {0} no longer exists")]
    EnrichedTableMissing(i32),

    /// The enrichment specification references a column no longer in the source schema
    #[error("Enrichment column '{0}' is no longer present in the source schema")]
    MissingSourceColumn(String),

    /// Stored enrichment specification could not be decoded
    #[error("Invalid stored enrichment specification: {0}")]
    InvalidSpec(String),

    /// Field failures exceeded the configured data-quality threshold
    #[error("{failed} of {total} enriched fields failed, above the allowed ratio {threshold}")]
    FailureRatioExceeded {
        /// Failed field count
        failed: usize,
        /// Total enriched field count
        total: usize,
        /// Configured ratio
        threshold: f64,
    },

    /// Schema lookup failed
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Storage failed during recompute
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sea_orm::DbErr> for SyncError {
    fn from(err: sea_orm::DbErr) -> Self {
        SyncError::Storage(StorageError::Database(err))
    }
}

impl SyncError {
    /// Structural failures move the enriched dataset into `SYNC_ERROR`
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            SyncError::Storage(_) | SyncError::EnrichedDatasetNotFound(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::EnrichedDatasetNotFound(_) => "NOT_FOUND",
            SyncError::Storage(err) => err.error_code(),
            _ => "SYNC_ERROR",
        }
    }
}
