use std::sync::Arc;

use chrono::Utc;
use csv::ReaderBuilder;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::{info, warn};

use crate::database::entities::{datasets, upload_logs};
use crate::errors::{IngestError, IngestResult};
use crate::services::ingestion_merger::{IngestionMerger, MergeResult};
use crate::services::schema_registry::{SchemaOwner, SchemaRegistry};
use crate::table::{FieldValue, Row};

const UTF8_BOM: char = '\u{feff}';

/// Turns uploaded CSV files into merge batches and keeps the upload log
pub struct ImportService {
    db: DatabaseConnection,
    merger: Arc<IngestionMerger>,
}

impl ImportService {
    pub fn new(db: DatabaseConnection, merger: Arc<IngestionMerger>) -> Self {
        Self { db, merger }
    }

    /// Import a CSV file into a dataset.
    ///
    /// The header row must list the registered columns in order. Empty cells
    /// become NULL. A filename can only be imported once per dataset. Rows
    /// and the upload log entry commit together.
    pub async fn import_csv(
        &self,
        dataset_id: i32,
        filename: &str,
        bytes: &[u8],
    ) -> IngestResult<MergeResult> {
        let txn = self.db.begin().await?;

        let dataset = datasets::Entity::find_by_id(dataset_id)
            .one(&txn)
            .await?
            .ok_or(IngestError::DatasetNotFound(dataset_id))?;

        let already_uploaded = upload_logs::Entity::find()
            .filter(upload_logs::Column::DatasetId.eq(dataset_id))
            .filter(upload_logs::Column::Filename.eq(filename))
            .count(&txn)
            .await?
            > 0;
        if already_uploaded {
            warn!(
                "Rejected upload of '{}' to dataset '{}': already imported",
                filename, dataset.name
            );
            return Err(IngestError::DuplicateFile {
                filename: filename.to_string(),
                dataset_id,
            });
        }

        let schema = SchemaRegistry::schema_for_in(&txn, SchemaOwner::Dataset(dataset_id)).await?;
        let expected = schema.column_names();
        let rows = parse_csv(bytes, &expected)?;
        let parsed = rows.len();

        let mut result = self.merger.merge_in(&txn, dataset_id, rows).await?;

        upload_logs::ActiveModel {
            dataset_id: Set(dataset_id),
            filename: Set(filename.to_string()),
            file_type: Set("csv".to_string()),
            row_count: Set(result.accepted as i32),
            rejected_duplicates: Set(result.rejected_duplicates as i32),
            rejected_errors: Set(result.errors.len() as i32),
            uploaded_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            "Imported '{}' into dataset '{}': {} of {} rows accepted",
            filename, dataset.name, result.accepted, parsed
        );
        self.merger.source_committed(dataset_id, &mut result).await;
        Ok(result)
    }

    /// Upload history of a dataset, oldest first
    pub async fn upload_history(&self, dataset_id: i32) -> IngestResult<Vec<upload_logs::Model>> {
        Ok(upload_logs::Entity::find()
            .filter(upload_logs::Column::DatasetId.eq(dataset_id))
            .order_by_asc(upload_logs::Column::UploadedAt)
            .order_by_asc(upload_logs::Column::Id)
            .all(&self.db)
            .await?)
    }
}

/// Parse CSV bytes into rows keyed by the expected column names
fn parse_csv(bytes: &[u8], expected: &[String]) -> IngestResult<Vec<Row>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = if i == 0 { h.trim_start_matches(UTF8_BOM) } else { h };
            h.trim().to_string()
        })
        .collect();
    check_headers(expected, &headers)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| {
                let value = if cell.is_empty() {
                    FieldValue::Null
                } else {
                    FieldValue::from(cell)
                };
                (header.clone(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn check_headers(expected: &[String], actual: &[String]) -> IngestResult<()> {
    let missing: Vec<String> = expected
        .iter()
        .filter(|c| !actual.contains(c))
        .cloned()
        .collect();
    let extra: Vec<String> = actual
        .iter()
        .filter(|c| !expected.contains(c))
        .cloned()
        .collect();
    if !missing.is_empty() || !extra.is_empty() {
        return Err(IngestError::HeaderMismatch { missing, extra });
    }
    if expected != actual {
        return Err(IngestError::HeaderOrder {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_csv_maps_empty_cells_to_null() {
        let data = b"name,age\nalice,30\nbob,\n";
        let rows = parse_csv(data, &columns(&["name", "age"])).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("age"), Some(&FieldValue::from("30")));
        assert_eq!(rows[1].get("age"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_parse_csv_strips_bom() {
        let data = "\u{feff}name\nalice\n".as_bytes();
        let rows = parse_csv(data, &columns(&["name"])).unwrap();
        assert_eq!(rows[0].get("name"), Some(&FieldValue::from("alice")));
    }

    #[test]
    fn test_header_mismatch_lists_missing_and_extra() {
        let err = check_headers(&columns(&["name", "age"]), &columns(&["name", "city"])).unwrap_err();
        match err {
            IngestError::HeaderMismatch { missing, extra } => {
                assert_eq!(missing, vec!["age".to_string()]);
                assert_eq!(extra, vec!["city".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_header_order_is_enforced() {
        let err = check_headers(&columns(&["name", "age"]), &columns(&["age", "name"])).unwrap_err();
        assert!(matches!(err, IngestError::HeaderOrder { .. }));
    }

    #[test]
    fn test_ragged_rows_are_csv_errors() {
        let data = b"name,age\nalice,30,extra\n";
        let err = parse_csv(data, &columns(&["name", "age"])).unwrap_err();
        assert!(matches!(err, IngestError::Csv(_)));
    }
}
