//! Domain-specific error types for wrangler-core
//!
//! Each engine component reports failures through its own error enum so
//! callers can tell local, recoverable failures apart from structural and
//! storage failures.
//!
//! # Error Categories
//!
//! - **SchemaError**: invalid column configuration, rejected at registration
//! - **RowError**: a single incoming row that could not be coerced (aggregated, never fatal)
//! - **IngestError**: merge/import operation failures
//! - **SyncError**: structural enrichment sync failures (surfaced as `SYNC_ERROR`)
//! - **StorageError**: I/O level failures; the whole operation is rolled back
//! - **DatasetError**: dataset / enriched dataset lifecycle failures at the facade
//!
//! # Examples
//!
//! ```rust
//! use wrangler::errors::{SchemaError, SyncError};
//!
//! let err = SchemaError::RealDuplicateKey("price".to_string());
//! assert!(err.is_client_error());
//!
//! let err = SyncError::SourceDatasetMissing(3);
//! assert_eq!(err.error_code(), "SYNC_ERROR");
//! ```

pub mod dataset;
pub mod ingest;
pub mod schema;
pub mod storage;
pub mod sync;

pub use dataset::DatasetError;
pub use ingest::{IngestError, RowError, RowErrorKind};
pub use schema::SchemaError;
pub use storage::StorageError;
pub use sync::SyncError;

/// Result type alias for schema registry operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Result type alias for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for dataset lifecycle operations
pub type DatasetResult<T> = Result<T, DatasetError>;
