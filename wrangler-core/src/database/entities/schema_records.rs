use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Versioned column contract for a dataset or enriched dataset
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schema_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub owner_kind: String, // 'dataset', 'enriched'
    pub owner_id: i32,
    #[sea_orm(column_type = "JsonBinary")]
    pub columns: serde_json::Value,
    pub duplicate_key: Option<String>,
    pub version: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
