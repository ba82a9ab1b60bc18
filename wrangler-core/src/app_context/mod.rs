use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sea_orm::{DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::EngineConfig;
use crate::database::connection::connect_and_migrate;
use crate::database::entities::{datasets, enriched_datasets, SyncStatus};
use crate::errors::DatasetError;
use crate::services::enrichment::{EnrichmentEngine, EnrichmentSpec};
use crate::services::import_service::ImportService;
use crate::services::ingestion_merger::IngestionMerger;
use crate::services::integrity_service::IntegrityService;
use crate::services::schema_registry::{SchemaRecord, SchemaRegistry};
use crate::services::sync_tracker::{MutationListener, SyncTracker};
use crate::services::table_lifecycle::TableLifecycleManager;
use crate::table::{ColumnDefinition, ColumnType, StoredRow};

mod dataset_operations;
mod enriched_operations;
mod integrity_operations;

/// Longest accepted dataset or enriched dataset name
pub const MAX_NAME_LENGTH: usize = 255;

/// Shared engine context used by the CLI and any other collaborator.
///
/// Every operation names the dataset it works on; there is no current
/// dataset. Mutations are serialized per source dataset, so work on
/// different slots proceeds concurrently.
#[derive(Clone)]
pub struct AppContext {
    db: DatabaseConnection,
    config: Arc<EngineConfig>,
    schema_registry: Arc<SchemaRegistry>,
    lifecycle: Arc<TableLifecycleManager>,
    sync_tracker: Arc<SyncTracker>,
    merger: Arc<IngestionMerger>,
    import_service: Arc<ImportService>,
    integrity_service: Arc<IntegrityService>,
    source_locks: Arc<SourceLocks>,
}

impl AppContext {
    pub fn new(db: DatabaseConnection, config: EngineConfig) -> Self {
        let schema_registry = Arc::new(SchemaRegistry::new(db.clone()));
        let lifecycle = Arc::new(TableLifecycleManager::new(
            db.clone(),
            config.insert_chunk_size,
        ));
        let sync_tracker = Arc::new(SyncTracker::new(
            db.clone(),
            lifecycle.clone(),
            EnrichmentEngine::new(config.enrichment.clone()),
            config.sync.clone(),
            config.auto_sync,
        ));
        let listener: Arc<dyn MutationListener> = sync_tracker.clone();
        let merger = Arc::new(
            IngestionMerger::new(db.clone(), lifecycle.clone(), config.image_detection.clone())
                .with_listener(listener),
        );
        let import_service = Arc::new(ImportService::new(db.clone(), merger.clone()));
        let integrity_service = Arc::new(IntegrityService::new(db.clone()));

        Self {
            db,
            config: Arc::new(config),
            schema_registry,
            lifecycle,
            sync_tracker,
            merger,
            import_service,
            integrity_service,
            source_locks: Arc::new(SourceLocks::default()),
        }
    }

    /// Connect to `config.database_url`, run pending migrations and build the context
    pub async fn connect(config: EngineConfig) -> Result<Self, DbErr> {
        let db = connect_and_migrate(&config.database_url).await?;
        Ok(Self::new(db, config))
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema_registry(&self) -> &Arc<SchemaRegistry> {
        &self.schema_registry
    }

    pub fn lifecycle(&self) -> &Arc<TableLifecycleManager> {
        &self.lifecycle
    }

    pub fn sync_tracker(&self) -> &Arc<SyncTracker> {
        &self.sync_tracker
    }

    pub fn merger(&self) -> &Arc<IngestionMerger> {
        &self.merger
    }

    pub fn import_service(&self) -> &Arc<ImportService> {
        &self.import_service
    }

    pub fn integrity_service(&self) -> &Arc<IntegrityService> {
        &self.integrity_service
    }

    /// Exclusive scope for mutations touching `source_dataset_id` or its
    /// enriched datasets
    async fn lock_source(&self, source_dataset_id: i32) -> OwnedMutexGuard<()> {
        self.source_locks.acquire(source_dataset_id).await
    }
}

#[derive(Default)]
struct SourceLocks {
    locks: Mutex<HashMap<i32, Arc<AsyncMutex<()>>>>,
}

impl SourceLocks {
    async fn acquire(&self, source_dataset_id: i32) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(source_dataset_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetCreateRequest {
    pub slot: i32,
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub duplicate_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichedCreateRequest {
    pub source_dataset_id: i32,
    pub name: String,
    /// `(column, function id)` pairs in output order
    pub enrichments: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub id: i32,
    pub slot: i32,
    pub name: String,
    pub table_id: i32,
    pub columns: Vec<ColumnDefinition>,
    pub duplicate_key: Option<String>,
    pub schema_version: i32,
    pub row_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatasetSummary {
    fn new(model: datasets::Model, schema: SchemaRecord, row_count: u64) -> Self {
        Self {
            id: model.id,
            slot: model.slot,
            name: model.name,
            table_id: model.table_id,
            columns: schema.columns,
            duplicate_key: schema.duplicate_key,
            schema_version: schema.version,
            row_count,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetStatistics {
    pub dataset_id: i32,
    pub total_rows: u64,
    pub total_uploads: usize,
    pub column_names: Vec<String>,
    pub column_types: IndexMap<String, ColumnType>,
    pub image_columns: Vec<String>,
    pub enriched_datasets: usize,
    pub first_upload: Option<DateTime<Utc>>,
    pub last_upload: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnrichedDatasetSummary {
    pub id: i32,
    pub name: String,
    pub source_dataset_id: i32,
    pub table_id: i32,
    pub enrichment_spec: EnrichmentSpec,
    pub columns_added: Vec<String>,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub row_count: u64,
    pub created_at: DateTime<Utc>,
}

impl EnrichedDatasetSummary {
    fn new(model: enriched_datasets::Model, row_count: u64) -> Self {
        Self {
            enrichment_spec: EnrichmentSpec::from_json(&model.enrichment_spec)
                .unwrap_or_default(),
            columns_added: model.added_columns(),
            sync_status: model.status(),
            id: model.id,
            name: model.name,
            source_dataset_id: model.source_dataset_id,
            table_id: model.table_id,
            last_synced_at: model.last_synced_at,
            last_error: model.last_error,
            row_count,
            created_at: model.created_at,
        }
    }
}

/// Page of rows read from a dataset or enriched dataset
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowPage {
    pub table_id: i32,
    pub total_rows: u64,
    pub offset: u64,
    pub rows: Vec<StoredRow>,
}

/// Trim and check a user supplied name
fn validate_name(name: &str) -> Result<String, DatasetError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DatasetError::InvalidName("name cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(DatasetError::InvalidName(format!(
            "name exceeds {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_trims() {
        assert_eq!(validate_name("  people ").unwrap(), "people");
    }

    #[test]
    fn test_validate_name_rejects_empty_and_long() {
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH)).is_ok());
    }

    #[tokio::test]
    async fn test_source_locks_are_per_dataset() {
        let locks = SourceLocks::default();
        let first = locks.acquire(1).await;
        // a different source is not blocked
        let _second = locks.acquire(2).await;
        drop(first);
        let _again = locks.acquire(1).await;
    }
}
