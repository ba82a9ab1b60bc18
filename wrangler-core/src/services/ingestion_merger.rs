use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ImageDetectionConfig;
use crate::database::entities::datasets;
use crate::errors::{IngestError, IngestResult, RowError};
use crate::services::image_detection::detect_image_columns;
use crate::services::schema_registry::{SchemaOwner, SchemaRecord, SchemaRegistry};
use crate::services::sync_tracker::{MutationListener, SyncReport, SyncTracker};
use crate::services::table_lifecycle::{NewRow, TableLifecycleManager};
use crate::table::{FieldValue, Row};

/// Outcome of one merge
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MergeResult {
    pub accepted: usize,
    pub rejected_duplicates: usize,
    pub errors: Vec<RowError>,
    /// Columns newly recognised as holding embedded images
    pub image_columns_flagged: Vec<String>,
    /// Automatic syncs triggered by the merge
    pub sync_reports: Vec<SyncReport>,
}

impl MergeResult {
    pub fn rejected(&self) -> usize {
        self.rejected_duplicates + self.errors.len()
    }
}

/// Appends validated, deduplicated rows to a dataset.
///
/// The whole batch is written in one transaction: either every accepted row
/// lands, or none do. Rows that fail coercion and rows whose duplicate key
/// was already seen are reported, not fatal.
pub struct IngestionMerger {
    db: DatabaseConnection,
    lifecycle: Arc<TableLifecycleManager>,
    image_config: ImageDetectionConfig,
    listener: Option<Arc<dyn MutationListener>>,
}

impl IngestionMerger {
    pub fn new(
        db: DatabaseConnection,
        lifecycle: Arc<TableLifecycleManager>,
        image_config: ImageDetectionConfig,
    ) -> Self {
        Self {
            db,
            lifecycle,
            image_config,
            listener: None,
        }
    }

    /// Notify `listener` after every merge that committed rows
    pub fn with_listener(mut self, listener: Arc<dyn MutationListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub async fn merge(&self, dataset_id: i32, rows: Vec<Row>) -> IngestResult<MergeResult> {
        let txn = self.db.begin().await?;
        let mut result = self.merge_in(&txn, dataset_id, rows).await?;
        txn.commit().await?;

        self.source_committed(dataset_id, &mut result).await;
        Ok(result)
    }

    /// Validate, deduplicate and write a batch on the caller's transaction.
    /// The caller commits and then hands the result to [`Self::source_committed`].
    pub async fn merge_in<C: ConnectionTrait>(
        &self,
        txn: &C,
        dataset_id: i32,
        rows: Vec<Row>,
    ) -> IngestResult<MergeResult> {
        let dataset = datasets::Entity::find_by_id(dataset_id)
            .one(txn)
            .await?
            .ok_or(IngestError::DatasetNotFound(dataset_id))?;
        let schema =
            SchemaRegistry::schema_for_in(txn, SchemaOwner::Dataset(dataset_id)).await?;

        let mut result = MergeResult::default();
        let mut candidates = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.into_iter().enumerate() {
            match coerce_row(&schema, row_index, row) {
                Ok(values) => {
                    let signature = schema
                        .duplicate_key_column()
                        .and_then(|key| values.get(&key.name))
                        .and_then(FieldValue::signature);
                    candidates.push(NewRow::new(values).with_signature(signature));
                }
                Err(err) => result.errors.push(err),
            }
        }

        let signatures: Vec<String> = candidates
            .iter()
            .filter_map(|row| row.dup_signature.clone())
            .collect();
        let stored =
            TableLifecycleManager::existing_signatures_in(txn, dataset.table_id, &signatures)
                .await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut accepted = Vec::with_capacity(candidates.len());
        for row in candidates {
            if let Some(signature) = &row.dup_signature {
                if stored.contains(signature) || !seen.insert(signature.clone()) {
                    result.rejected_duplicates += 1;
                    continue;
                }
            }
            accepted.push(row);
        }

        if !accepted.is_empty() {
            let values: Vec<Row> = accepted.iter().map(|row| row.values.clone()).collect();
            let detected = detect_image_columns(&schema.columns, &values, &self.image_config);
            if !detected.is_empty() {
                result.image_columns_flagged = SchemaRegistry::mark_image_columns_in(
                    txn,
                    SchemaOwner::Dataset(dataset_id),
                    &detected,
                )
                .await?;
            }

            result.accepted = self
                .lifecycle
                .append_rows_in(txn, dataset.table_id, accepted)
                .await?;

            SyncTracker::mark_dependents_stale_in(txn, dataset_id).await?;
            datasets::Entity::update_many()
                .col_expr(datasets::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(datasets::Column::Id.eq(dataset_id))
                .exec(txn)
                .await?;
        }

        info!(
            "Merging into dataset '{}': {} accepted, {} duplicates, {} errors",
            dataset.name,
            result.accepted,
            result.rejected_duplicates,
            result.errors.len()
        );
        Ok(result)
    }

    /// Run the mutation listener once a merge has committed rows. Sync
    /// outcomes are attached to `result`; they never fail the merge.
    pub async fn source_committed(&self, dataset_id: i32, result: &mut MergeResult) {
        if result.accepted == 0 {
            return;
        }
        let Some(listener) = &self.listener else {
            return;
        };

        result.sync_reports = listener.source_mutated(dataset_id).await;
        for report in result.sync_reports.iter().filter(|r| !r.is_in_sync()) {
            warn!(
                "Automatic sync of enriched dataset {} failed: {}",
                report.enriched_dataset_id,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Coerce every field of an incoming row to the declared type. Declared
/// columns absent from the row are stored as NULL. The first failing field
/// rejects the row.
fn coerce_row(schema: &SchemaRecord, row_index: usize, row: Row) -> Result<Row, RowError> {
    if let Some(unknown) = row.keys().find(|key| schema.column(key).is_none()) {
        return Err(RowError::unknown_column(row_index, unknown.clone()));
    }

    let mut values = Row::with_capacity(schema.columns.len());
    for column in &schema.columns {
        let raw = row.get(&column.name).unwrap_or(&FieldValue::Null);
        match column.column_type.coerce(raw) {
            Some(value) => {
                values.insert(column.name.clone(), value);
            }
            None => {
                debug!(
                    "Row {} rejected: '{}' is not a valid {}",
                    row_index, column.name, column.column_type
                );
                return Err(RowError::type_coercion(
                    row_index,
                    column.name.clone(),
                    column.column_type.to_string(),
                    raw.to_string(),
                ));
            }
        }
    }
    Ok(values)
}
