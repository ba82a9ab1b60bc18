pub mod data_tables;
pub mod datasets;
pub mod enriched_datasets;
pub mod schema_records;
pub mod sync_status;
pub mod table_rows;
pub mod upload_logs;

pub use sync_status::SyncStatus;
