use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Arena row storage shared by every dataset and enriched dataset table
///
/// `dup_signature` is only populated for datasets with a duplicate key. The
/// unique index on `(table_id, dup_signature)` lets SQLite reject a duplicate
/// even if the merger's own check is bypassed; NULL signatures never collide.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "table_rows")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub table_id: i32,
    pub row_uuid: String,
    pub position: i64,
    pub source_row_uuid: Option<String>,
    pub dup_signature: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub data: serde_json::Value,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::data_tables::Entity",
        from = "Column::TableId",
        to = "super::data_tables::Column::Id"
    )]
    DataTables,
}

impl Related<super::data_tables::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DataTables.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
