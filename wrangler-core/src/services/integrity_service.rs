use std::collections::HashSet;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
    TransactionTrait,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::database::entities::data_tables::TableKind;
use crate::database::entities::{
    data_tables, datasets, enriched_datasets, schema_records, table_rows, SyncStatus,
};
use crate::errors::StorageResult;
use crate::services::table_lifecycle::TableLifecycleManager;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrphanedTable {
    pub id: i32,
    pub name: String,
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrphanedSchema {
    pub id: i32,
    pub owner_kind: String,
    pub owner_id: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    /// Tables no dataset or enriched dataset points at
    pub orphaned_tables: Vec<OrphanedTable>,
    /// Table ids referenced by stored rows but absent from the registry
    pub orphaned_row_tables: Vec<i32>,
    pub enriched_missing_table: Vec<i32>,
    pub enriched_missing_source: Vec<i32>,
    pub orphaned_schemas: Vec<OrphanedSchema>,
    /// Dataset records whose backing table is gone
    pub datasets_missing_table: Vec<i32>,
}

impl IntegrityReport {
    pub fn total_issues(&self) -> usize {
        self.orphaned_tables.len()
            + self.orphaned_row_tables.len()
            + self.enriched_missing_table.len()
            + self.enriched_missing_source.len()
            + self.orphaned_schemas.len()
            + self.datasets_missing_table.len()
    }

    pub fn is_clean(&self) -> bool {
        self.total_issues() == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub issues: IntegrityReport,
    pub tables_removed: usize,
    pub rows_removed: u64,
    pub schemas_removed: u64,
    pub enriched_marked_error: u64,
}

/// Finds storage left behind by interrupted or external changes
pub struct IntegrityService {
    db: DatabaseConnection,
}

impl IntegrityService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn check(&self) -> StorageResult<IntegrityReport> {
        Self::check_in(&self.db).await
    }

    pub async fn check_in<C: ConnectionTrait>(conn: &C) -> StorageResult<IntegrityReport> {
        let tables = data_tables::Entity::find().all(conn).await?;
        let dataset_records = datasets::Entity::find().all(conn).await?;
        let enriched_records = enriched_datasets::Entity::find().all(conn).await?;
        let schemas = schema_records::Entity::find().all(conn).await?;

        let table_ids: HashSet<i32> = tables.iter().map(|t| t.id).collect();
        let dataset_ids: HashSet<i32> = dataset_records.iter().map(|d| d.id).collect();
        let enriched_ids: HashSet<i32> = enriched_records.iter().map(|e| e.id).collect();
        let owned_tables: HashSet<i32> = dataset_records
            .iter()
            .map(|d| d.table_id)
            .chain(enriched_records.iter().map(|e| e.table_id))
            .collect();

        let mut report = IntegrityReport {
            orphaned_tables: tables
                .iter()
                .filter(|t| !owned_tables.contains(&t.id))
                .map(|t| OrphanedTable {
                    id: t.id,
                    name: t.name.clone(),
                    kind: t.kind.clone(),
                })
                .collect(),
            datasets_missing_table: dataset_records
                .iter()
                .filter(|d| !table_ids.contains(&d.table_id))
                .map(|d| d.id)
                .collect(),
            enriched_missing_table: enriched_records
                .iter()
                .filter(|e| !table_ids.contains(&e.table_id))
                .map(|e| e.id)
                .collect(),
            enriched_missing_source: enriched_records
                .iter()
                .filter(|e| !dataset_ids.contains(&e.source_dataset_id))
                .map(|e| e.id)
                .collect(),
            orphaned_schemas: schemas
                .iter()
                .filter(|s| match TableKind::from_str(&s.owner_kind) {
                    Some(TableKind::Dataset) => !dataset_ids.contains(&s.owner_id),
                    Some(TableKind::Enriched) => !enriched_ids.contains(&s.owner_id),
                    None => true,
                })
                .map(|s| OrphanedSchema {
                    id: s.id,
                    owner_kind: s.owner_kind.clone(),
                    owner_id: s.owner_id,
                })
                .collect(),
            ..Default::default()
        };

        let row_tables: Vec<i32> = table_rows::Entity::find()
            .select_only()
            .column(table_rows::Column::TableId)
            .distinct()
            .into_tuple()
            .all(conn)
            .await?;
        report.orphaned_row_tables = row_tables
            .into_iter()
            .filter(|id| !table_ids.contains(id))
            .collect();

        if !report.is_clean() {
            warn!("Integrity check found {} issues", report.total_issues());
        }
        Ok(report)
    }

    /// Remove orphaned tables, rows and schema records. Enriched datasets that
    /// lost their table or source are moved to `SYNC_ERROR`, never deleted.
    /// With `dry_run` nothing is changed.
    pub async fn cleanup(&self, dry_run: bool) -> StorageResult<CleanupReport> {
        let txn = self.db.begin().await?;
        let issues = Self::check_in(&txn).await?;

        let mut report = CleanupReport {
            dry_run,
            ..Default::default()
        };
        if dry_run || issues.is_clean() {
            txn.rollback().await?;
            report.issues = issues;
            return Ok(report);
        }

        for table in &issues.orphaned_tables {
            let dropped = TableLifecycleManager::drop_storage_in(&txn, table.id).await?;
            report.tables_removed += dropped.tables_dropped;
            report.rows_removed += dropped.rows_deleted;
        }
        if !issues.orphaned_row_tables.is_empty() {
            report.rows_removed += table_rows::Entity::delete_many()
                .filter(table_rows::Column::TableId.is_in(issues.orphaned_row_tables.clone()))
                .exec(&txn)
                .await?
                .rows_affected;
        }
        if !issues.orphaned_schemas.is_empty() {
            report.schemas_removed = schema_records::Entity::delete_many()
                .filter(
                    schema_records::Column::Id
                        .is_in(issues.orphaned_schemas.iter().map(|s| s.id)),
                )
                .exec(&txn)
                .await?
                .rows_affected;
        }

        let mut broken: Vec<i32> = issues
            .enriched_missing_table
            .iter()
            .chain(&issues.enriched_missing_source)
            .copied()
            .collect();
        broken.sort_unstable();
        broken.dedup();
        for enriched_id in broken {
            let detail = if issues.enriched_missing_source.contains(&enriched_id) {
                "Source dataset no longer exists"
            } else {
                "Enriched table no longer exists"
            };
            report.enriched_marked_error += enriched_datasets::Entity::update_many()
                .col_expr(
                    enriched_datasets::Column::SyncStatus,
                    Expr::value(SyncStatus::SyncError.as_str()),
                )
                .col_expr(enriched_datasets::Column::LastError, Expr::value(detail))
                .col_expr(enriched_datasets::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(enriched_datasets::Column::Id.eq(enriched_id))
                .exec(&txn)
                .await?
                .rows_affected;
        }

        txn.commit().await?;
        info!(
            "Integrity cleanup removed {} tables, {} rows, {} schema records; {} enriched datasets marked SYNC_ERROR",
            report.tables_removed,
            report.rows_removed,
            report.schemas_removed,
            report.enriched_marked_error
        );
        report.issues = issues;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_utils::setup_test_db;
    use crate::table::ColumnDefinition;

    #[tokio::test]
    async fn test_clean_database_has_no_issues() {
        let db = setup_test_db().await;
        let report = IntegrityService::new(db).check().await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_cleanup_removes_orphaned_table() {
        let db = setup_test_db().await;
        let lifecycle = TableLifecycleManager::new(db.clone(), 100);
        let table = lifecycle
            .create_table(TableKind::Dataset, "stray", &[ColumnDefinition::text("a")])
            .await
            .unwrap();

        let service = IntegrityService::new(db.clone());
        let report = service.check().await.unwrap();
        assert_eq!(report.orphaned_tables.len(), 1);
        assert_eq!(report.orphaned_tables[0].id, table.id);

        let dry = service.cleanup(true).await.unwrap();
        assert_eq!(dry.tables_removed, 0);
        assert!(lifecycle.table_exists(table.id).await.unwrap());

        let cleaned = service.cleanup(false).await.unwrap();
        assert_eq!(cleaned.tables_removed, 1);
        assert!(!lifecycle.table_exists(table.id).await.unwrap());
        assert!(service.check().await.unwrap().is_clean());
    }
}
