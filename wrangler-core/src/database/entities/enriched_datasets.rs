use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sync_status::SyncStatus;

/// Derived dataset produced by enriching a source dataset
///
/// The sync status record (`sync_status`, `last_synced_at`, `last_error`) is
/// kept on the same row so it changes atomically with the derived table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "enriched_datasets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub source_dataset_id: i32,
    pub table_id: i32,
    #[sea_orm(column_type = "JsonBinary")]
    pub enrichment_spec: serde_json::Value,
    #[sea_orm(column_type = "JsonBinary")]
    pub columns_added: serde_json::Value,
    pub sync_status: String, // 'IN_SYNC', 'STALE', 'SYNC_ERROR'
    pub last_synced_at: Option<ChronoDateTimeUtc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::datasets::Entity",
        from = "Column::SourceDatasetId",
        to = "super::datasets::Column::Id"
    )]
    Datasets,
}

impl Related<super::datasets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Datasets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed sync status; unknown values read as `SYNC_ERROR`
    pub fn status(&self) -> SyncStatus {
        SyncStatus::from_str(&self.sync_status).unwrap_or(SyncStatus::SyncError)
    }

    pub fn added_columns(&self) -> Vec<String> {
        serde_json::from_value(self.columns_added.clone()).unwrap_or_default()
    }
}
