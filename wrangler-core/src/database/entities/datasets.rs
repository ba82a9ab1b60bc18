use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A dataset slot. Column contracts live in `schema_records`, rows in
/// `table_rows` under `table_id`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "datasets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub slot: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub table_id: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::enriched_datasets::Entity")]
    EnrichedDatasets,
    #[sea_orm(has_many = "super::upload_logs::Entity")]
    UploadLogs,
}

impl Related<super::enriched_datasets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EnrichedDatasets.def()
    }
}

impl Related<super::upload_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UploadLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
