pub mod enrichment;
pub mod image_detection;
pub mod import_service;
pub mod ingestion_merger;
pub mod integrity_service;
pub mod schema_registry;
pub mod sync_tracker;
pub mod table_lifecycle;

pub use enrichment::{EnrichmentEngine, EnrichmentFunction, EnrichmentSpec};
pub use import_service::ImportService;
pub use ingestion_merger::{IngestionMerger, MergeResult};
pub use integrity_service::IntegrityService;
pub use schema_registry::{SchemaOwner, SchemaRecord, SchemaRegistry};
pub use sync_tracker::{MutationListener, SyncReport, SyncTracker};
pub use table_lifecycle::TableLifecycleManager;
