use chrono::Utc;
use indexmap::IndexMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::info;

use super::{
    validate_name, AppContext, DatasetCreateRequest, DatasetStatistics, DatasetSummary, RowPage,
};
use crate::database::entities::data_tables::TableKind;
use crate::database::entities::{datasets, enriched_datasets, upload_logs};
use crate::errors::{DatasetError, DatasetResult, IngestError};
use crate::services::ingestion_merger::MergeResult;
use crate::services::schema_registry::{SchemaOwner, SchemaRegistry};
use crate::services::table_lifecycle::{DropSummary, TableLifecycleManager};
use crate::table::Row;

impl AppContext {
    /// Register the schema and create the backing table of a new dataset in
    /// one transaction
    pub async fn create_dataset(&self, request: DatasetCreateRequest) -> DatasetResult<DatasetSummary> {
        let DatasetCreateRequest {
            slot,
            name,
            columns,
            duplicate_key,
        } = request;

        let max = self.config.max_slots;
        if slot < 1 || slot > i32::from(max) {
            return Err(DatasetError::InvalidSlot { slot, max });
        }
        let name = validate_name(&name)?;
        let columns = SchemaRegistry::validate(&columns, duplicate_key.as_deref())?;

        let txn = self.db.begin().await?;

        if let Some(existing) = datasets::Entity::find()
            .filter(datasets::Column::Slot.eq(slot))
            .one(&txn)
            .await?
        {
            return Err(DatasetError::SlotOccupied {
                slot,
                name: existing.name,
            });
        }
        let name_taken = datasets::Entity::find()
            .filter(datasets::Column::Name.eq(name.as_str()))
            .count(&txn)
            .await?
            > 0;
        if name_taken {
            return Err(DatasetError::AlreadyExists(name));
        }

        let table = self
            .lifecycle
            .create_table_in(
                &txn,
                TableKind::Dataset,
                &TableLifecycleManager::dataset_table_name(slot, &name),
                &columns,
            )
            .await?;

        let now = Utc::now();
        let dataset = datasets::ActiveModel {
            slot: Set(slot),
            name: Set(name),
            table_id: Set(table.id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let schema = SchemaRegistry::register_in(
            &txn,
            SchemaOwner::Dataset(dataset.id),
            &columns,
            duplicate_key.as_deref(),
        )
        .await?;

        txn.commit().await?;

        info!(
            "Created dataset '{}' in slot {} (table '{}')",
            dataset.name, dataset.slot, table.name
        );
        Ok(DatasetSummary::new(dataset, schema, 0))
    }

    pub async fn list_datasets(&self) -> DatasetResult<Vec<DatasetSummary>> {
        let models = datasets::Entity::find()
            .order_by_asc(datasets::Column::Slot)
            .all(&self.db)
            .await?;

        let mut summaries = Vec::with_capacity(models.len());
        for model in models {
            summaries.push(self.summarize_dataset(model).await?);
        }
        Ok(summaries)
    }

    pub async fn get_dataset(&self, dataset_id: i32) -> DatasetResult<DatasetSummary> {
        let model = self.find_dataset(dataset_id).await?;
        self.summarize_dataset(model).await
    }

    pub async fn dataset_statistics(&self, dataset_id: i32) -> DatasetResult<DatasetStatistics> {
        let dataset = self.find_dataset(dataset_id).await?;
        let schema = self
            .schema_registry
            .schema_for(SchemaOwner::Dataset(dataset_id))
            .await?;
        let total_rows = self.lifecycle.row_count(dataset.table_id).await?;

        let uploads = upload_logs::Entity::find()
            .filter(upload_logs::Column::DatasetId.eq(dataset_id))
            .order_by_asc(upload_logs::Column::UploadedAt)
            .all(&self.db)
            .await?;
        let enriched_datasets = enriched_datasets::Entity::find()
            .filter(enriched_datasets::Column::SourceDatasetId.eq(dataset_id))
            .count(&self.db)
            .await? as usize;

        let column_types: IndexMap<_, _> = schema
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.column_type))
            .collect();

        Ok(DatasetStatistics {
            dataset_id,
            total_rows,
            total_uploads: uploads.len(),
            column_names: schema.column_names(),
            column_types,
            image_columns: schema.image_columns(),
            enriched_datasets,
            first_upload: uploads.first().map(|u| u.uploaded_at),
            last_upload: uploads.last().map(|u| u.uploaded_at),
        })
    }

    /// Merge a batch of rows. Dependent enriched datasets are synced
    /// afterwards when automatic sync is enabled.
    pub async fn merge_rows(&self, dataset_id: i32, rows: Vec<Row>) -> DatasetResult<MergeResult> {
        let _guard = self.lock_source(dataset_id).await;
        self.merger
            .merge(dataset_id, rows)
            .await
            .map_err(ingest_error)
    }

    pub async fn import_csv(
        &self,
        dataset_id: i32,
        filename: &str,
        bytes: &[u8],
    ) -> DatasetResult<MergeResult> {
        let _guard = self.lock_source(dataset_id).await;
        self.import_service
            .import_csv(dataset_id, filename, bytes)
            .await
            .map_err(ingest_error)
    }

    /// Delete a dataset together with every enriched dataset built on it
    pub async fn delete_dataset(&self, dataset_id: i32) -> DatasetResult<DropSummary> {
        let _guard = self.lock_source(dataset_id).await;

        let txn = self.db.begin().await?;
        let dataset = datasets::Entity::find_by_id(dataset_id)
            .one(&txn)
            .await?
            .ok_or(DatasetError::NotFound(dataset_id))?;
        let summary = self.lifecycle.drop_dataset_in(&txn, &dataset).await?;
        txn.commit().await?;

        Ok(summary)
    }

    /// Flag columns as holding embedded images. Returns the newly flagged ones.
    pub async fn update_image_columns(
        &self,
        dataset_id: i32,
        columns: &[String],
    ) -> DatasetResult<Vec<String>> {
        let _guard = self.lock_source(dataset_id).await;
        self.find_dataset(dataset_id).await?;
        Ok(self
            .schema_registry
            .mark_image_columns(SchemaOwner::Dataset(dataset_id), columns)
            .await?)
    }

    /// Read a page of rows from a dataset or an enriched dataset
    pub async fn load_rows(
        &self,
        owner: SchemaOwner,
        offset: u64,
        limit: Option<u64>,
    ) -> DatasetResult<RowPage> {
        let table_id = match owner {
            SchemaOwner::Dataset(id) => self.find_dataset(id).await?.table_id,
            SchemaOwner::Enriched(id) => self.find_enriched(id).await?.table_id,
        };
        let total_rows = self.lifecycle.row_count(table_id).await?;
        let rows =
            TableLifecycleManager::load_rows_in(&self.db, table_id, Some(offset), limit).await?;

        Ok(RowPage {
            table_id,
            total_rows,
            offset,
            rows,
        })
    }

    pub(super) async fn find_dataset(&self, dataset_id: i32) -> DatasetResult<datasets::Model> {
        datasets::Entity::find_by_id(dataset_id)
            .one(&self.db)
            .await?
            .ok_or(DatasetError::NotFound(dataset_id))
    }

    async fn summarize_dataset(&self, model: datasets::Model) -> DatasetResult<DatasetSummary> {
        let schema = self
            .schema_registry
            .schema_for(SchemaOwner::Dataset(model.id))
            .await?;
        let row_count = self.lifecycle.row_count(model.table_id).await?;
        Ok(DatasetSummary::new(model, schema, row_count))
    }
}

fn ingest_error(err: IngestError) -> DatasetError {
    match err {
        IngestError::DatasetNotFound(id) => DatasetError::NotFound(id),
        other => DatasetError::Ingest(other),
    }
}
