use std::collections::HashSet;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::entities::data_tables::{self, TableKind};
use crate::database::entities::{datasets, enriched_datasets, table_rows, upload_logs};
use crate::errors::{StorageError, StorageResult};
use crate::services::schema_registry::{SchemaOwner, SchemaRegistry};
use crate::table::{sanitize_identifier, ColumnDefinition, FieldValue, Row, StoredRow};

/// Upper bound for `IN (...)` lists sent to SQLite
const SIGNATURE_QUERY_CHUNK: usize = 500;
const MAX_NAME_ATTEMPTS: usize = 1000;

/// A row to be written into a table
#[derive(Clone, Debug, PartialEq)]
pub struct NewRow {
    pub values: Row,
    pub dup_signature: Option<String>,
    pub source_row_uuid: Option<String>,
}

impl NewRow {
    pub fn new(values: Row) -> Self {
        Self {
            values,
            dup_signature: None,
            source_row_uuid: None,
        }
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.dup_signature = signature;
        self
    }

    /// A derived row computed from the source row `source_row_uuid`
    pub fn derived(source_row_uuid: String, values: Row) -> Self {
        Self {
            values,
            dup_signature: None,
            source_row_uuid: Some(source_row_uuid),
        }
    }
}

/// What a drop removed
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DropSummary {
    pub tables_dropped: usize,
    pub rows_deleted: u64,
    pub dataset_dropped: Option<i32>,
    pub enriched_dropped: Vec<i32>,
}

/// Creates, fills and tears down the row stores behind datasets and
/// enriched datasets.
///
/// Methods ending in `_in` run on the caller's connection so they can be
/// composed into one transaction. The remaining methods open their own.
pub struct TableLifecycleManager {
    db: DatabaseConnection,
    insert_chunk_size: usize,
}

impl TableLifecycleManager {
    pub fn new(db: DatabaseConnection, insert_chunk_size: usize) -> Self {
        Self {
            db,
            insert_chunk_size: insert_chunk_size.max(1),
        }
    }

    /// Base table name for a dataset slot
    pub fn dataset_table_name(slot: i32, name: &str) -> String {
        format!("dataset_{}_{}", slot, sanitize_identifier(name).to_lowercase())
    }

    /// Base table name for an enriched dataset; a `_v<n>` suffix is added on creation
    pub fn enriched_table_name(source_table: &str) -> String {
        format!("enriched_{}", source_table)
    }

    pub async fn create_table(
        &self,
        kind: TableKind,
        base_name: &str,
        columns: &[ColumnDefinition],
    ) -> StorageResult<data_tables::Model> {
        self.create_table_in(&self.db, kind, base_name, columns).await
    }

    /// Allocate a uniquely named table with the physical shape of `columns`.
    ///
    /// Dataset tables take `base_name` and fall back to `base_name_2`,
    /// `base_name_3`, ... on collision. Enriched tables are versioned:
    /// `base_name_v1`, `base_name_v2`, ...
    pub async fn create_table_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        kind: TableKind,
        base_name: &str,
        columns: &[ColumnDefinition],
    ) -> StorageResult<data_tables::Model> {
        let name = Self::allocate_name_in(conn, kind, base_name).await?;
        let shape: Vec<ColumnDefinition> = columns.iter().map(ColumnDefinition::physical).collect();

        let table = data_tables::ActiveModel::new(name, kind, serde_json::to_value(&shape)?)
            .insert(conn)
            .await?;

        info!(
            "Created {} table '{}' (id {}) with {} columns",
            kind.as_str(),
            table.name,
            table.id,
            shape.len()
        );
        Ok(table)
    }

    async fn allocate_name_in<C: ConnectionTrait>(
        conn: &C,
        kind: TableKind,
        base_name: &str,
    ) -> StorageResult<String> {
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let candidate = match (kind, attempt) {
                (TableKind::Dataset, 1) => base_name.to_string(),
                (TableKind::Dataset, n) => format!("{}_{}", base_name, n),
                (TableKind::Enriched, n) => format!("{}_v{}", base_name, n),
            };
            let taken = data_tables::Entity::find()
                .filter(data_tables::Column::Name.eq(candidate.as_str()))
                .count(conn)
                .await?
                > 0;
            if !taken {
                return Ok(candidate);
            }
            debug!("Table name '{}' is taken", candidate);
        }
        Err(StorageError::NameExhausted(base_name.to_string()))
    }

    /// Create a new table shaped as `dest_columns` and fill it with the rows of
    /// `source_table_id`. Every source column must be present in the
    /// destination shape.
    pub async fn copy_table_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        source_table_id: i32,
        kind: TableKind,
        base_name: &str,
        dest_columns: &[ColumnDefinition],
    ) -> StorageResult<data_tables::Model> {
        let source = Self::find_table_in(conn, source_table_id).await?;
        for column in source.shape()? {
            if !dest_columns.iter().any(|c| c.name == column.name) {
                return Err(StorageError::IncompatibleCopy(column.name));
            }
        }

        let table = self.create_table_in(conn, kind, base_name, dest_columns).await?;

        let source_rows = table_rows::Entity::find()
            .filter(table_rows::Column::TableId.eq(source_table_id))
            .order_by_asc(table_rows::Column::Position)
            .all(conn)
            .await?;

        let now = Utc::now();
        let copies: Vec<table_rows::ActiveModel> = source_rows
            .into_iter()
            .map(|row| table_rows::ActiveModel {
                table_id: Set(table.id),
                row_uuid: Set(Uuid::new_v4().to_string()),
                position: Set(row.position),
                source_row_uuid: Set(Some(row.row_uuid)),
                dup_signature: Set(row.dup_signature),
                data: Set(row.data),
                created_at: Set(now),
                ..Default::default()
            })
            .collect();
        let copied = copies.len();
        self.insert_chunked_in(conn, copies).await?;

        info!(
            "Copied {} rows from table {} into '{}'",
            copied, source_table_id, table.name
        );
        Ok(table)
    }

    /// Atomically swap the contents of a table for `rows`
    pub async fn replace_table_contents(
        &self,
        table_id: i32,
        rows: Vec<NewRow>,
    ) -> StorageResult<usize> {
        let txn = self.db.begin().await?;
        let written = self.replace_table_contents_in(&txn, table_id, rows).await?;
        txn.commit().await?;
        Ok(written)
    }

    pub async fn replace_table_contents_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        table_id: i32,
        rows: Vec<NewRow>,
    ) -> StorageResult<usize> {
        let table = Self::find_table_in(conn, table_id).await?;
        let shape = table.shape()?;
        check_shape(&table.name, &shape, &rows)?;

        let removed = table_rows::Entity::delete_many()
            .filter(table_rows::Column::TableId.eq(table_id))
            .exec(conn)
            .await?
            .rows_affected;

        let written = rows.len();
        let models = build_models(table_id, 0, rows)?;
        self.insert_chunked_in(conn, models).await?;

        debug!(
            "Replaced contents of '{}': {} rows removed, {} written",
            table.name, removed, written
        );
        Ok(written)
    }

    /// Append rows after the current last position
    pub async fn append_rows_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        table_id: i32,
        rows: Vec<NewRow>,
    ) -> StorageResult<usize> {
        let table = Self::find_table_in(conn, table_id).await?;
        let shape = table.shape()?;
        check_shape(&table.name, &shape, &rows)?;

        let next_position = table_rows::Entity::find()
            .filter(table_rows::Column::TableId.eq(table_id))
            .order_by_desc(table_rows::Column::Position)
            .one(conn)
            .await?
            .map(|row| row.position + 1)
            .unwrap_or(0);

        let written = rows.len();
        let models = build_models(table_id, next_position, rows)?;
        self.insert_chunked_in(conn, models).await?;
        Ok(written)
    }

    async fn insert_chunked_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        models: Vec<table_rows::ActiveModel>,
    ) -> StorageResult<()> {
        let mut models = models.into_iter().peekable();
        while models.peek().is_some() {
            let chunk: Vec<_> = models.by_ref().take(self.insert_chunk_size).collect();
            table_rows::Entity::insert_many(chunk).exec(conn).await?;
        }
        Ok(())
    }

    /// Drop a table and everything that depends on it, in one transaction.
    ///
    /// A dataset table takes its enriched datasets (tables, rows, schemas,
    /// records), its schema, its upload logs and the dataset record with it.
    /// An enriched table only removes that enriched dataset.
    pub async fn drop_table(&self, table_id: i32) -> StorageResult<DropSummary> {
        let txn = self.db.begin().await?;
        let summary = self.drop_table_in(&txn, table_id).await?;
        txn.commit().await?;
        Ok(summary)
    }

    pub async fn drop_table_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        table_id: i32,
    ) -> StorageResult<DropSummary> {
        let table = Self::find_table_in(conn, table_id).await?;

        match table.table_kind()? {
            TableKind::Dataset => {
                let dataset = datasets::Entity::find()
                    .filter(datasets::Column::TableId.eq(table_id))
                    .one(conn)
                    .await?;
                match dataset {
                    Some(dataset) => self.drop_dataset_in(conn, &dataset).await,
                    None => Self::drop_storage_in(conn, table_id).await,
                }
            }
            TableKind::Enriched => {
                let enriched = enriched_datasets::Entity::find()
                    .filter(enriched_datasets::Column::TableId.eq(table_id))
                    .one(conn)
                    .await?;
                match enriched {
                    Some(enriched) => self.drop_enriched_in(conn, &enriched).await,
                    None => Self::drop_storage_in(conn, table_id).await,
                }
            }
        }
    }

    /// Cascade delete of a dataset. Enriched dependents are dropped before
    /// the source itself.
    pub async fn drop_dataset_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset: &datasets::Model,
    ) -> StorageResult<DropSummary> {
        let dependents = enriched_datasets::Entity::find()
            .filter(enriched_datasets::Column::SourceDatasetId.eq(dataset.id))
            .all(conn)
            .await?;

        let mut summary = DropSummary::default();
        for enriched in &dependents {
            let dropped = self.drop_enriched_in(conn, enriched).await?;
            summary.tables_dropped += dropped.tables_dropped;
            summary.rows_deleted += dropped.rows_deleted;
            summary.enriched_dropped.extend(dropped.enriched_dropped);
        }

        let storage = Self::drop_storage_in(conn, dataset.table_id).await?;
        summary.tables_dropped += storage.tables_dropped;
        summary.rows_deleted += storage.rows_deleted;

        SchemaRegistry::remove_in(conn, SchemaOwner::Dataset(dataset.id)).await?;
        upload_logs::Entity::delete_many()
            .filter(upload_logs::Column::DatasetId.eq(dataset.id))
            .exec(conn)
            .await?;
        datasets::Entity::delete_by_id(dataset.id).exec(conn).await?;
        summary.dataset_dropped = Some(dataset.id);

        info!(
            "Dropped dataset '{}' (slot {}) with {} enriched datasets, {} rows removed",
            dataset.name,
            dataset.slot,
            summary.enriched_dropped.len(),
            summary.rows_deleted
        );
        Ok(summary)
    }

    /// Delete an enriched dataset. The source is never touched.
    pub async fn drop_enriched_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        enriched: &enriched_datasets::Model,
    ) -> StorageResult<DropSummary> {
        let mut summary = Self::drop_storage_in(conn, enriched.table_id).await?;
        SchemaRegistry::remove_in(conn, SchemaOwner::Enriched(enriched.id)).await?;
        enriched_datasets::Entity::delete_by_id(enriched.id)
            .exec(conn)
            .await?;
        summary.enriched_dropped.push(enriched.id);

        debug!(
            "Dropped enriched dataset '{}' ({} rows)",
            enriched.name, summary.rows_deleted
        );
        Ok(summary)
    }

    /// Remove a table record and its rows. A missing table record is not an
    /// error so cascades can clean up after partially broken state.
    pub async fn drop_storage_in<C: ConnectionTrait>(
        conn: &C,
        table_id: i32,
    ) -> StorageResult<DropSummary> {
        let rows_deleted = table_rows::Entity::delete_many()
            .filter(table_rows::Column::TableId.eq(table_id))
            .exec(conn)
            .await?
            .rows_affected;
        let tables_dropped = data_tables::Entity::delete_by_id(table_id)
            .exec(conn)
            .await?
            .rows_affected as usize;

        if tables_dropped == 0 {
            warn!("Table {} had no registry entry while dropping", table_id);
        }

        Ok(DropSummary {
            tables_dropped,
            rows_deleted,
            ..Default::default()
        })
    }

    pub async fn table_exists(&self, table_id: i32) -> StorageResult<bool> {
        Self::table_exists_in(&self.db, table_id).await
    }

    pub async fn table_exists_in<C: ConnectionTrait>(conn: &C, table_id: i32) -> StorageResult<bool> {
        Ok(data_tables::Entity::find_by_id(table_id)
            .one(conn)
            .await?
            .is_some())
    }

    pub async fn row_count(&self, table_id: i32) -> StorageResult<u64> {
        Self::row_count_in(&self.db, table_id).await
    }

    pub async fn row_count_in<C: ConnectionTrait>(conn: &C, table_id: i32) -> StorageResult<u64> {
        Ok(table_rows::Entity::find()
            .filter(table_rows::Column::TableId.eq(table_id))
            .count(conn)
            .await?)
    }

    pub async fn load_rows(&self, table_id: i32) -> StorageResult<Vec<StoredRow>> {
        Self::load_rows_in(&self.db, table_id, None, None).await
    }

    /// Rows in insertion order, with values ordered by the table shape
    pub async fn load_rows_in<C: ConnectionTrait>(
        conn: &C,
        table_id: i32,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> StorageResult<Vec<StoredRow>> {
        let table = Self::find_table_in(conn, table_id).await?;
        let shape = table.shape()?;

        let rows = table_rows::Entity::find()
            .filter(table_rows::Column::TableId.eq(table_id))
            .order_by_asc(table_rows::Column::Position)
            .offset(offset)
            .limit(limit)
            .all(conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let values: Row = shape
                    .iter()
                    .map(|column| {
                        let value = row
                            .data
                            .get(&column.name)
                            .map(FieldValue::from_json)
                            .unwrap_or(FieldValue::Null);
                        (column.name.clone(), value)
                    })
                    .collect();
                StoredRow {
                    row_uuid: row.row_uuid,
                    position: row.position,
                    source_row_uuid: row.source_row_uuid,
                    values,
                }
            })
            .collect())
    }

    /// The subset of `signatures` already stored in the table
    pub async fn existing_signatures_in<C: ConnectionTrait>(
        conn: &C,
        table_id: i32,
        signatures: &[String],
    ) -> StorageResult<HashSet<String>> {
        let mut existing = HashSet::new();
        for chunk in signatures.chunks(SIGNATURE_QUERY_CHUNK) {
            let found: Vec<Option<String>> = table_rows::Entity::find()
                .select_only()
                .column(table_rows::Column::DupSignature)
                .filter(table_rows::Column::TableId.eq(table_id))
                .filter(table_rows::Column::DupSignature.is_in(chunk.iter().cloned()))
                .into_tuple()
                .all(conn)
                .await?;
            existing.extend(found.into_iter().flatten());
        }
        Ok(existing)
    }

    pub async fn find_table_in<C: ConnectionTrait>(
        conn: &C,
        table_id: i32,
    ) -> StorageResult<data_tables::Model> {
        data_tables::Entity::find_by_id(table_id)
            .one(conn)
            .await?
            .ok_or(StorageError::TableNotFound(table_id))
    }
}

fn check_shape(table: &str, shape: &[ColumnDefinition], rows: &[NewRow]) -> StorageResult<()> {
    for row in rows {
        if let Some(column) = row
            .values
            .keys()
            .find(|key| !shape.iter().any(|c| &c.name == *key))
        {
            return Err(StorageError::ShapeMismatch {
                table: table.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

fn build_models(
    table_id: i32,
    first_position: i64,
    rows: Vec<NewRow>,
) -> StorageResult<Vec<table_rows::ActiveModel>> {
    let now = Utc::now();
    rows.into_iter()
        .zip(first_position..)
        .map(|(row, position)| {
            Ok(table_rows::ActiveModel {
                table_id: Set(table_id),
                row_uuid: Set(Uuid::new_v4().to_string()),
                position: Set(position),
                source_row_uuid: Set(row.source_row_uuid),
                dup_signature: Set(row.dup_signature),
                data: Set(serde_json::to_value(&row.values)?),
                created_at: Set(now),
                ..Default::default()
            })
        })
        .collect()
}
