use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::info;

use super::{validate_name, AppContext, EnrichedCreateRequest, EnrichedDatasetSummary};
use crate::database::entities::data_tables::TableKind;
use crate::database::entities::{datasets, enriched_datasets, SyncStatus};
use crate::errors::{DatasetError, DatasetResult, SyncError};
use crate::services::enrichment::EnrichmentSpec;
use crate::services::schema_registry::{SchemaOwner, SchemaRegistry};
use crate::services::sync_tracker::{SyncReport, SyncStatusRecord};
use crate::services::table_lifecycle::{DropSummary, TableLifecycleManager};

impl AppContext {
    /// Create an enriched dataset from a non-empty source. Registration, the
    /// table copy and the initial enrichment commit together; the result is
    /// `IN_SYNC`.
    pub async fn create_enriched_dataset(
        &self,
        request: EnrichedCreateRequest,
    ) -> DatasetResult<EnrichedDatasetSummary> {
        let EnrichedCreateRequest {
            source_dataset_id,
            name,
            enrichments,
        } = request;

        let name = validate_name(&name)?;
        let spec = EnrichmentSpec::parse(enrichments)?;

        let _guard = self.lock_source(source_dataset_id).await;
        let txn = self.db.begin().await?;

        let source = datasets::Entity::find_by_id(source_dataset_id)
            .one(&txn)
            .await?
            .ok_or(DatasetError::NotFound(source_dataset_id))?;
        let name_taken = enriched_datasets::Entity::find()
            .filter(enriched_datasets::Column::Name.eq(name.as_str()))
            .count(&txn)
            .await?
            > 0;
        if name_taken {
            return Err(DatasetError::AlreadyExists(name));
        }
        if TableLifecycleManager::row_count_in(&txn, source.table_id).await? == 0 {
            return Err(DatasetError::EmptySource(source_dataset_id));
        }

        let source_schema =
            SchemaRegistry::schema_for_in(&txn, SchemaOwner::Dataset(source_dataset_id)).await?;
        let columns = SchemaRegistry::derive_enriched_columns(&source_schema.columns, &spec)?;
        let source_table = TableLifecycleManager::find_table_in(&txn, source.table_id).await?;

        let table = self
            .lifecycle
            .copy_table_in(
                &txn,
                source.table_id,
                TableKind::Enriched,
                &TableLifecycleManager::enriched_table_name(&source_table.name),
                &columns,
            )
            .await?;

        let now = Utc::now();
        let added: Vec<String> = spec.output_columns().into_iter().map(|c| c.name).collect();
        let enriched = enriched_datasets::ActiveModel {
            name: Set(name),
            source_dataset_id: Set(source_dataset_id),
            table_id: Set(table.id),
            enrichment_spec: Set(spec.to_json()),
            columns_added: Set(serde_json::json!(added)),
            sync_status: Set(SyncStatus::Stale.as_str().to_string()),
            last_synced_at: Set(None),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        SchemaRegistry::register_in(&txn, SchemaOwner::Enriched(enriched.id), &columns, None)
            .await?;

        let report = self.sync_tracker.recompute_in(&txn, &enriched).await?;
        txn.commit().await?;

        info!(
            "Created enriched dataset '{}' from '{}' ({} rows, {} malformed fields)",
            enriched.name, source.name, report.rows_written, report.fields_malformed
        );
        self.get_enriched_dataset(enriched.id).await
    }

    /// Enriched datasets, optionally restricted to one source
    pub async fn list_enriched_datasets(
        &self,
        source_dataset_id: Option<i32>,
    ) -> DatasetResult<Vec<EnrichedDatasetSummary>> {
        let mut query = enriched_datasets::Entity::find();
        if let Some(source_id) = source_dataset_id {
            query = query.filter(enriched_datasets::Column::SourceDatasetId.eq(source_id));
        }
        let models = query
            .order_by_asc(enriched_datasets::Column::Id)
            .all(&self.db)
            .await?;

        let mut summaries = Vec::with_capacity(models.len());
        for model in models {
            let row_count = self.enriched_row_count(&model).await?;
            summaries.push(EnrichedDatasetSummary::new(model, row_count));
        }
        Ok(summaries)
    }

    pub async fn get_enriched_dataset(
        &self,
        enriched_id: i32,
    ) -> DatasetResult<EnrichedDatasetSummary> {
        let model = self.find_enriched(enriched_id).await?;
        let row_count = self.enriched_row_count(&model).await?;
        Ok(EnrichedDatasetSummary::new(model, row_count))
    }

    /// Manual "sync now". A structural failure is reported through the
    /// returned report, not as an error.
    pub async fn sync_enriched_dataset(&self, enriched_id: i32) -> DatasetResult<SyncReport> {
        let enriched = self.find_enriched(enriched_id).await?;
        let _guard = self.lock_source(enriched.source_dataset_id).await;
        self.sync_tracker
            .sync_now(enriched_id)
            .await
            .map_err(sync_error)
    }

    pub async fn sync_all_for_source(&self, source_dataset_id: i32) -> DatasetResult<Vec<SyncReport>> {
        self.find_dataset(source_dataset_id).await?;
        let _guard = self.lock_source(source_dataset_id).await;
        Ok(self
            .sync_tracker
            .sync_all_for_source(source_dataset_id)
            .await?)
    }

    pub async fn enriched_status(&self, enriched_id: i32) -> DatasetResult<SyncStatusRecord> {
        self.sync_tracker
            .status(enriched_id)
            .await
            .map_err(sync_error)
    }

    /// Delete an enriched dataset; its source is untouched
    pub async fn delete_enriched_dataset(&self, enriched_id: i32) -> DatasetResult<DropSummary> {
        let enriched = self.find_enriched(enriched_id).await?;
        let _guard = self.lock_source(enriched.source_dataset_id).await;

        let txn = self.db.begin().await?;
        let enriched = enriched_datasets::Entity::find_by_id(enriched_id)
            .one(&txn)
            .await?
            .ok_or(DatasetError::EnrichedNotFound(enriched_id))?;
        let summary = self.lifecycle.drop_enriched_in(&txn, &enriched).await?;
        txn.commit().await?;

        info!("Deleted enriched dataset '{}'", enriched.name);
        Ok(summary)
    }

    pub(super) async fn find_enriched(
        &self,
        enriched_id: i32,
    ) -> DatasetResult<enriched_datasets::Model> {
        enriched_datasets::Entity::find_by_id(enriched_id)
            .one(&self.db)
            .await?
            .ok_or(DatasetError::EnrichedNotFound(enriched_id))
    }

    async fn enriched_row_count(&self, model: &enriched_datasets::Model) -> DatasetResult<u64> {
        // the table may be gone while the record stays in SYNC_ERROR
        if !self.lifecycle.table_exists(model.table_id).await? {
            return Ok(0);
        }
        Ok(self.lifecycle.row_count(model.table_id).await?)
    }
}

fn sync_error(err: SyncError) -> DatasetError {
    match err {
        SyncError::EnrichedDatasetNotFound(id) => DatasetError::EnrichedNotFound(id),
        other => DatasetError::Sync(other),
    }
}
