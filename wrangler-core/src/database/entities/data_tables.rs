use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::errors::{StorageError, StorageResult};
use crate::table::ColumnDefinition;

/// Registry of row stores. Every dataset and enriched dataset owns exactly
/// one entry; its rows live in `table_rows` keyed by this id.
///
/// `columns` holds the physical shape (name and type per column) as JSON.
/// Display flags and the duplicate key belong to the schema registry.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "data_tables")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub kind: String, // 'dataset', 'enriched'
    #[sea_orm(column_type = "JsonBinary")]
    pub columns: serde_json::Value,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::table_rows::Entity")]
    TableRows,
}

impl Related<super::table_rows::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TableRows.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub fn new(name: String, kind: TableKind, columns: serde_json::Value) -> Self {
        Self {
            name: Set(name),
            kind: Set(kind.as_str().to_string()),
            columns: Set(columns),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
    }
}

impl Model {
    pub fn shape(&self) -> StorageResult<Vec<ColumnDefinition>> {
        Ok(serde_json::from_value(self.columns.clone())?)
    }

    pub fn table_kind(&self) -> Result<TableKind, StorageError> {
        TableKind::from_str(&self.kind).ok_or_else(|| {
            StorageError::Database(DbErr::Custom(format!(
                "Unknown table kind '{}' for table {}",
                self.kind, self.id
            )))
        })
    }
}

/// What kind of owner a table belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Dataset,
    Enriched,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Dataset => "dataset",
            TableKind::Enriched => "enriched",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dataset" => Some(TableKind::Dataset),
            "enriched" => Some(TableKind::Enriched),
            _ => None,
        }
    }
}
