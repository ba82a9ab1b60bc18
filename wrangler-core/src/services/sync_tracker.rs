use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SyncPolicyConfig;
use crate::database::entities::{datasets, enriched_datasets, SyncStatus};
use crate::errors::{SchemaError, SyncError, SyncResult};
use crate::services::enrichment::{EnrichmentEngine, EnrichmentSpec, FieldDiagnostic};
use crate::services::schema_registry::{SchemaOwner, SchemaRegistry};
use crate::services::table_lifecycle::{NewRow, TableLifecycleManager};

/// Receives source mutation events from the ingestion merger
#[async_trait]
pub trait MutationListener: Send + Sync {
    /// Called after a merge committed at least one row into `dataset_id`.
    /// Failures are reported, never raised.
    async fn source_mutated(&self, dataset_id: i32) -> Vec<SyncReport>;
}

/// Outcome of one recompute attempt
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncReport {
    pub enriched_dataset_id: i32,
    pub status: SyncStatus,
    pub rows_written: usize,
    pub fields_malformed: usize,
    pub fields_empty: usize,
    pub diagnostics: Vec<FieldDiagnostic>,
    pub error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    fn failed(enriched_dataset_id: i32, error: String) -> Self {
        Self {
            enriched_dataset_id,
            status: SyncStatus::SyncError,
            rows_written: 0,
            fields_malformed: 0,
            fields_empty: 0,
            diagnostics: Vec::new(),
            error: Some(error),
            synced_at: None,
        }
    }

    pub fn is_in_sync(&self) -> bool {
        self.status == SyncStatus::InSync
    }
}

/// Queryable sync status of an enriched dataset
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncStatusRecord {
    pub enriched_dataset_id: i32,
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&enriched_datasets::Model> for SyncStatusRecord {
    fn from(model: &enriched_datasets::Model) -> Self {
        Self {
            enriched_dataset_id: model.id,
            status: model.status(),
            last_synced_at: model.last_synced_at,
            last_error: model.last_error.clone(),
        }
    }
}

/// Tracks whether each enriched dataset reflects its source and recomputes
/// it when it does not.
///
/// `IN_SYNC -> STALE` happens inside the merge transaction. A recompute
/// always rebuilds the whole derived table from the current source rows.
/// Structural failures park the dataset in `SYNC_ERROR`, which automatic
/// sync skips until a manual sync succeeds.
pub struct SyncTracker {
    db: DatabaseConnection,
    lifecycle: Arc<TableLifecycleManager>,
    engine: EnrichmentEngine,
    policy: SyncPolicyConfig,
    auto_sync: bool,
}

impl SyncTracker {
    pub fn new(
        db: DatabaseConnection,
        lifecycle: Arc<TableLifecycleManager>,
        engine: EnrichmentEngine,
        policy: SyncPolicyConfig,
        auto_sync: bool,
    ) -> Self {
        Self {
            db,
            lifecycle,
            engine,
            policy,
            auto_sync,
        }
    }

    pub fn auto_sync(&self) -> bool {
        self.auto_sync
    }

    /// Move every `IN_SYNC` dependent of `source_dataset_id` to `STALE`.
    /// `SYNC_ERROR` dependents keep their status and error detail.
    pub async fn mark_dependents_stale_in<C: ConnectionTrait>(
        conn: &C,
        source_dataset_id: i32,
    ) -> Result<u64, DbErr> {
        let result = enriched_datasets::Entity::update_many()
            .col_expr(
                enriched_datasets::Column::SyncStatus,
                Expr::value(SyncStatus::Stale.as_str()),
            )
            .col_expr(enriched_datasets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(enriched_datasets::Column::SourceDatasetId.eq(source_dataset_id))
            .filter(enriched_datasets::Column::SyncStatus.eq(SyncStatus::InSync.as_str()))
            .exec(conn)
            .await?;

        if result.rows_affected > 0 {
            debug!(
                "Marked {} enriched datasets of dataset {} stale",
                result.rows_affected, source_dataset_id
            );
        }
        Ok(result.rows_affected)
    }

    pub async fn status(&self, enriched_id: i32) -> SyncResult<SyncStatusRecord> {
        let enriched = self.find_enriched(enriched_id).await?;
        Ok(SyncStatusRecord::from(&enriched))
    }

    /// Manual full recompute. Allowed in every state. A structural failure
    /// comes back as a `SYNC_ERROR` report; only storage failures are errors.
    pub async fn sync_now(&self, enriched_id: i32) -> SyncResult<SyncReport> {
        let enriched = self.find_enriched(enriched_id).await?;
        info!("Manual sync of enriched dataset '{}'", enriched.name);
        self.recompute(enriched).await
    }

    /// Manual sync of every enriched dataset built on `source_dataset_id`.
    /// Every dependent is attempted; the first storage failure is returned
    /// once the rest have been recomputed.
    pub async fn sync_all_for_source(&self, source_dataset_id: i32) -> SyncResult<Vec<SyncReport>> {
        let dependents = enriched_datasets::Entity::find()
            .filter(enriched_datasets::Column::SourceDatasetId.eq(source_dataset_id))
            .order_by_asc(enriched_datasets::Column::Id)
            .all(&self.db)
            .await?;

        let mut reports = Vec::with_capacity(dependents.len());
        let mut first_failure = None;
        for enriched in dependents {
            let enriched_id = enriched.id;
            match self.recompute(enriched).await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    reports.push(SyncReport::failed(enriched_id, err.to_string()));
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => {
                warn!(
                    "Bulk sync of dataset {}: {} of {} enriched datasets failed",
                    source_dataset_id,
                    reports.iter().filter(|r| !r.is_in_sync()).count(),
                    reports.len()
                );
                Err(err)
            }
            None => Ok(reports),
        }
    }

    /// Automatic path: recompute the `STALE` dependents of a source. Does
    /// nothing when automatic sync is disabled. Never fails; storage failures
    /// are turned into `SYNC_ERROR` reports.
    pub async fn sync_stale_for_source(&self, source_dataset_id: i32) -> Vec<SyncReport> {
        if !self.auto_sync {
            return Vec::new();
        }

        let stale = match enriched_datasets::Entity::find()
            .filter(enriched_datasets::Column::SourceDatasetId.eq(source_dataset_id))
            .filter(enriched_datasets::Column::SyncStatus.eq(SyncStatus::Stale.as_str()))
            .order_by_asc(enriched_datasets::Column::Id)
            .all(&self.db)
            .await
        {
            Ok(stale) => stale,
            Err(err) => {
                error!(
                    "Failed to load stale enriched datasets of dataset {}: {}",
                    source_dataset_id, err
                );
                return Vec::new();
            }
        };

        let mut reports = Vec::with_capacity(stale.len());
        for enriched in stale {
            let enriched_id = enriched.id;
            let report = match self.recompute(enriched).await {
                Ok(report) => report,
                Err(err) => SyncReport::failed(enriched_id, err.to_string()),
            };
            reports.push(report);
        }
        reports
    }

    async fn find_enriched(&self, enriched_id: i32) -> SyncResult<enriched_datasets::Model> {
        enriched_datasets::Entity::find_by_id(enriched_id)
            .one(&self.db)
            .await?
            .ok_or(SyncError::EnrichedDatasetNotFound(enriched_id))
    }

    async fn recompute(&self, enriched: enriched_datasets::Model) -> SyncResult<SyncReport> {
        let txn = self.db.begin().await?;

        match self.recompute_in(&txn, &enriched).await {
            Ok(report) => {
                txn.commit().await?;
                info!(
                    "Enriched dataset '{}' in sync ({} rows, {} malformed fields)",
                    enriched.name, report.rows_written, report.fields_malformed
                );
                Ok(report)
            }
            Err(err) if err.is_structural() => {
                txn.rollback().await?;
                let message = err.to_string();
                warn!("Sync of enriched dataset '{}' failed: {}", enriched.name, message);
                self.record_error(enriched.id, &message).await?;
                Ok(SyncReport::failed(enriched.id, message))
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!("Rollback after failed sync also failed: {}", rollback_err);
                }
                error!("Storage failure syncing '{}': {}", enriched.name, err);
                if let Err(record_err) = self.record_error(enriched.id, &err.to_string()).await {
                    warn!(
                        "Could not record SYNC_ERROR for enriched dataset {}: {}",
                        enriched.id, record_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Full recompute on the caller's connection: re-enrich every source row,
    /// swap the derived table contents and mark the dataset `IN_SYNC`.
    pub async fn recompute_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        enriched: &enriched_datasets::Model,
    ) -> SyncResult<SyncReport> {
        let spec = EnrichmentSpec::from_json(&enriched.enrichment_spec)
            .map_err(|e| SyncError::InvalidSpec(e.to_string()))?;

        let source = datasets::Entity::find_by_id(enriched.source_dataset_id)
            .one(conn)
            .await?
            .ok_or(SyncError::SourceDatasetMissing(enriched.source_dataset_id))?;
        if !TableLifecycleManager::table_exists_in(conn, source.table_id).await? {
            return Err(SyncError::SourceTableMissing(source.table_id));
        }
        if !TableLifecycleManager::table_exists_in(conn, enriched.table_id).await? {
            return Err(SyncError::EnrichedTableMissing(enriched.table_id));
        }

        let source_schema = SchemaRegistry::schema_for_in(conn, SchemaOwner::Dataset(source.id))
            .await
            .map_err(schema_failure)?;
        if let Some(missing) = EnrichmentEngine::validate(&spec, &source_schema.columns)
            .into_iter()
            .next()
        {
            return Err(SyncError::MissingSourceColumn(missing));
        }
        let derived_columns =
            SchemaRegistry::derive_enriched_columns(&source_schema.columns, &spec)
                .map_err(schema_failure)?;

        let source_rows =
            TableLifecycleManager::load_rows_in(conn, source.table_id, None, None).await?;
        let output = self
            .engine
            .enrich(&source_rows, &source_schema.columns, &spec);
        let stats = output.stats;

        if let Some(threshold) = self.policy.max_field_failure_ratio {
            if stats.fields_total > 0 && stats.malformed_ratio() > threshold {
                return Err(SyncError::FailureRatioExceeded {
                    failed: stats.fields_malformed,
                    total: stats.fields_total,
                    threshold,
                });
            }
        }

        let rows: Vec<NewRow> = output
            .rows
            .into_iter()
            .map(|row| NewRow::derived(row.source_row_uuid, row.values))
            .collect();
        let rows_written = self
            .lifecycle
            .replace_table_contents_in(conn, enriched.table_id, rows)
            .await?;

        SchemaRegistry::register_in(conn, SchemaOwner::Enriched(enriched.id), &derived_columns, None)
            .await
            .map_err(schema_failure)?;

        let now = Utc::now();
        let added: Vec<String> = spec
            .output_columns()
            .into_iter()
            .map(|c| c.name)
            .collect();
        let mut active: enriched_datasets::ActiveModel = enriched.clone().into();
        active.sync_status = Set(SyncStatus::InSync.as_str().to_string());
        active.last_synced_at = Set(Some(now));
        active.last_error = Set(None);
        active.columns_added = Set(serde_json::json!(added));
        active.updated_at = Set(now);
        active.update(conn).await?;

        Ok(SyncReport {
            enriched_dataset_id: enriched.id,
            status: SyncStatus::InSync,
            rows_written,
            fields_malformed: stats.fields_malformed,
            fields_empty: stats.fields_empty,
            diagnostics: stats.diagnostics,
            error: None,
            synced_at: Some(now),
        })
    }

    async fn record_error(&self, enriched_id: i32, message: &str) -> SyncResult<()> {
        enriched_datasets::Entity::update_many()
            .col_expr(
                enriched_datasets::Column::SyncStatus,
                Expr::value(SyncStatus::SyncError.as_str()),
            )
            .col_expr(enriched_datasets::Column::LastError, Expr::value(message))
            .col_expr(enriched_datasets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(enriched_datasets::Column::Id.eq(enriched_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

/// Database failures behind a schema lookup are storage failures, not
/// structural ones
fn schema_failure(err: SchemaError) -> SyncError {
    match err {
        SchemaError::Database(db) => SyncError::from(db),
        other => SyncError::Schema(other),
    }
}

#[async_trait]
impl MutationListener for SyncTracker {
    async fn source_mutated(&self, dataset_id: i32) -> Vec<SyncReport> {
        self.sync_stale_for_source(dataset_id).await
    }
}
