use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::entities::data_tables::TableKind;
use crate::database::entities::{datasets, schema_records, table_rows};
use crate::errors::{SchemaError, SchemaResult};
use crate::services::enrichment::EnrichmentSpec;
use crate::table::{ColumnDefinition, ColumnType};

/// Who a schema record belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SchemaOwner {
    Dataset(i32),
    Enriched(i32),
}

impl SchemaOwner {
    pub fn kind(&self) -> TableKind {
        match self {
            SchemaOwner::Dataset(_) => TableKind::Dataset,
            SchemaOwner::Enriched(_) => TableKind::Enriched,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            SchemaOwner::Dataset(id) | SchemaOwner::Enriched(id) => *id,
        }
    }

    fn from_record(kind: &str, id: i32) -> Option<Self> {
        match TableKind::from_str(kind)? {
            TableKind::Dataset => Some(SchemaOwner::Dataset(id)),
            TableKind::Enriched => Some(SchemaOwner::Enriched(id)),
        }
    }
}

impl fmt::Display for SchemaOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaOwner::Dataset(id) => write!(f, "dataset {}", id),
            SchemaOwner::Enriched(id) => write!(f, "enriched dataset {}", id),
        }
    }
}

/// Authoritative column contract of a dataset or enriched dataset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub owner: SchemaOwner,
    pub columns: Vec<ColumnDefinition>,
    pub duplicate_key: Option<String>,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl SchemaRecord {
    fn from_model(model: schema_records::Model) -> SchemaResult<Self> {
        let owner = SchemaOwner::from_record(&model.owner_kind, model.owner_id).ok_or_else(|| {
            SchemaError::Database(DbErr::Custom(format!(
                "Unknown schema owner kind '{}'",
                model.owner_kind
            )))
        })?;
        Ok(Self {
            owner,
            columns: serde_json::from_value(model.columns)?,
            duplicate_key: model.duplicate_key,
            version: model.version,
            updated_at: model.updated_at,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn duplicate_key_column(&self) -> Option<&ColumnDefinition> {
        self.duplicate_key.as_deref().and_then(|key| self.column(key))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn image_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_image)
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Owns the versioned column contracts of every dataset and enriched dataset.
///
/// A dataset's contract is frozen once its table holds rows; only image
/// flags may still change.
pub struct SchemaRegistry {
    db: DatabaseConnection,
}

impl SchemaRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Check a column configuration and return it with the duplicate-key flag
    /// normalized onto the resolved key column.
    pub fn validate(
        columns: &[ColumnDefinition],
        duplicate_key: Option<&str>,
    ) -> SchemaResult<Vec<ColumnDefinition>> {
        if columns.is_empty() {
            return Err(SchemaError::NoColumns);
        }

        let mut seen = HashSet::new();
        for (index, column) in columns.iter().enumerate() {
            let name = column.name.trim();
            if name.is_empty() {
                return Err(SchemaError::EmptyColumnName(index));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(SchemaError::DuplicateColumnName(name.to_string()));
            }
        }

        let flagged: Vec<&ColumnDefinition> =
            columns.iter().filter(|c| c.is_duplicate_key).collect();
        if flagged.len() > 1 {
            return Err(SchemaError::MultipleDuplicateKeys(
                flagged.iter().map(|c| c.name.clone()).collect(),
            ));
        }

        let key = match (duplicate_key.map(str::trim).filter(|k| !k.is_empty()), flagged.first()) {
            (Some(requested), Some(flag)) if flag.name.trim() != requested => {
                return Err(SchemaError::DuplicateKeyConflict {
                    requested: requested.to_string(),
                    flagged: flag.name.clone(),
                })
            }
            (Some(requested), _) => Some(requested.to_string()),
            (None, Some(flag)) => Some(flag.name.trim().to_string()),
            (None, None) => None,
        };

        if let Some(key) = &key {
            let column = columns
                .iter()
                .find(|c| c.name.trim() == key)
                .ok_or_else(|| SchemaError::DuplicateKeyNotFound(key.clone()))?;
            if column.column_type == ColumnType::Real {
                return Err(SchemaError::RealDuplicateKey(key.clone()));
            }
        }

        Ok(columns
            .iter()
            .map(|c| {
                let name = c.name.trim().to_string();
                ColumnDefinition {
                    is_duplicate_key: key.as_deref() == Some(name.as_str()),
                    name,
                    ..c.clone()
                }
            })
            .collect())
    }

    pub async fn register(
        &self,
        owner: SchemaOwner,
        columns: &[ColumnDefinition],
        duplicate_key: Option<&str>,
    ) -> SchemaResult<SchemaRecord> {
        let txn = self.db.begin().await?;
        let record = Self::register_in(&txn, owner, columns, duplicate_key).await?;
        txn.commit().await?;
        Ok(record)
    }

    /// Create or replace the contract for `owner`. Re-registering an
    /// identical contract keeps the current version.
    pub async fn register_in<C: ConnectionTrait>(
        conn: &C,
        owner: SchemaOwner,
        columns: &[ColumnDefinition],
        duplicate_key: Option<&str>,
    ) -> SchemaResult<SchemaRecord> {
        let columns = Self::validate(columns, duplicate_key)?;
        let key = columns
            .iter()
            .find(|c| c.is_duplicate_key)
            .map(|c| c.name.clone());
        let now = Utc::now();

        let Some(existing) = Self::find_model_in(conn, owner).await? else {
            let model = schema_records::ActiveModel {
                owner_kind: Set(owner.kind().as_str().to_string()),
                owner_id: Set(owner.id()),
                columns: Set(serde_json::to_value(&columns)?),
                duplicate_key: Set(key),
                version: Set(1),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await?;
            info!("Registered schema for {} ({} columns)", owner, columns.len());
            return SchemaRecord::from_model(model);
        };

        let current = SchemaRecord::from_model(existing.clone())?;
        if current.columns == columns && current.duplicate_key == key {
            return Ok(current);
        }

        let structural_change = current.duplicate_key != key
            || current.columns.len() != columns.len()
            || current
                .columns
                .iter()
                .zip(&columns)
                .any(|(a, b)| a.name != b.name || a.column_type != b.column_type);
        if structural_change {
            if let SchemaOwner::Dataset(dataset_id) = owner {
                if Self::dataset_has_rows_in(conn, dataset_id).await? {
                    return Err(SchemaError::Immutable(owner.to_string()));
                }
            }
        }

        let version = existing.version + 1;
        let mut active: schema_records::ActiveModel = existing.into();
        active.columns = Set(serde_json::to_value(&columns)?);
        active.duplicate_key = Set(key);
        active.version = Set(version);
        active.updated_at = Set(now);
        let model = active.update(conn).await?;

        info!("Updated schema for {} to version {}", owner, version);
        SchemaRecord::from_model(model)
    }

    async fn dataset_has_rows_in<C: ConnectionTrait>(conn: &C, dataset_id: i32) -> SchemaResult<bool> {
        let Some(dataset) = datasets::Entity::find_by_id(dataset_id).one(conn).await? else {
            return Ok(false);
        };
        let rows = table_rows::Entity::find()
            .filter(table_rows::Column::TableId.eq(dataset.table_id))
            .count(conn)
            .await?;
        Ok(rows > 0)
    }

    pub async fn columns_for(&self, owner: SchemaOwner) -> SchemaResult<Vec<ColumnDefinition>> {
        Ok(self.schema_for(owner).await?.columns)
    }

    pub async fn schema_for(&self, owner: SchemaOwner) -> SchemaResult<SchemaRecord> {
        Self::schema_for_in(&self.db, owner).await
    }

    pub async fn schema_for_in<C: ConnectionTrait>(
        conn: &C,
        owner: SchemaOwner,
    ) -> SchemaResult<SchemaRecord> {
        Self::find_in(conn, owner)
            .await?
            .ok_or_else(|| SchemaError::NotRegistered(owner.to_string()))
    }

    pub async fn find_in<C: ConnectionTrait>(
        conn: &C,
        owner: SchemaOwner,
    ) -> SchemaResult<Option<SchemaRecord>> {
        Self::find_model_in(conn, owner)
            .await?
            .map(SchemaRecord::from_model)
            .transpose()
    }

    async fn find_model_in<C: ConnectionTrait>(
        conn: &C,
        owner: SchemaOwner,
    ) -> Result<Option<schema_records::Model>, DbErr> {
        schema_records::Entity::find()
            .filter(schema_records::Column::OwnerKind.eq(owner.kind().as_str()))
            .filter(schema_records::Column::OwnerId.eq(owner.id()))
            .one(conn)
            .await
    }

    pub async fn mark_image_columns(
        &self,
        owner: SchemaOwner,
        names: &[String],
    ) -> SchemaResult<Vec<String>> {
        Self::mark_image_columns_in(&self.db, owner, names).await
    }

    /// Set the image flag on `names`. Flags are never cleared here. Returns the
    /// columns that were newly flagged; the version only moves when that list
    /// is non-empty.
    pub async fn mark_image_columns_in<C: ConnectionTrait>(
        conn: &C,
        owner: SchemaOwner,
        names: &[String],
    ) -> SchemaResult<Vec<String>> {
        let existing = Self::find_model_in(conn, owner)
            .await?
            .ok_or_else(|| SchemaError::NotRegistered(owner.to_string()))?;
        let mut record = SchemaRecord::from_model(existing.clone())?;

        let mut newly_flagged = Vec::new();
        for name in names {
            let column = record
                .columns
                .iter_mut()
                .find(|c| &c.name == name)
                .ok_or_else(|| SchemaError::UnknownColumn(name.clone()))?;
            if !column.is_image {
                column.is_image = true;
                newly_flagged.push(name.clone());
            }
        }

        if newly_flagged.is_empty() {
            return Ok(newly_flagged);
        }

        let version = existing.version + 1;
        let mut active: schema_records::ActiveModel = existing.into();
        active.columns = Set(serde_json::to_value(&record.columns)?);
        active.version = Set(version);
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;

        debug!("Flagged image columns {:?} on {}", newly_flagged, owner);
        Ok(newly_flagged)
    }

    pub async fn remove_in<C: ConnectionTrait>(conn: &C, owner: SchemaOwner) -> Result<u64, DbErr> {
        Ok(schema_records::Entity::delete_many()
            .filter(schema_records::Column::OwnerKind.eq(owner.kind().as_str()))
            .filter(schema_records::Column::OwnerId.eq(owner.id()))
            .exec(conn)
            .await?
            .rows_affected)
    }

    /// Enriched schema: the source columns (without a duplicate key) followed
    /// by the output columns of every spec entry.
    pub fn derive_enriched_columns(
        source_columns: &[ColumnDefinition],
        spec: &EnrichmentSpec,
    ) -> SchemaResult<Vec<ColumnDefinition>> {
        for entry in spec.entries() {
            if !source_columns.iter().any(|c| c.name == entry.column) {
                return Err(SchemaError::UnknownColumn(entry.column.clone()));
            }
        }

        let taken: HashSet<String> = source_columns
            .iter()
            .map(|c| c.name.to_lowercase())
            .collect();
        let outputs = spec.output_columns();
        if let Some(collision) = outputs
            .iter()
            .find(|c| taken.contains(&c.name.to_lowercase()))
        {
            return Err(SchemaError::OutputColumnCollision(collision.name.clone()));
        }

        let mut columns: Vec<ColumnDefinition> = source_columns
            .iter()
            .map(|c| ColumnDefinition {
                is_duplicate_key: false,
                ..c.clone()
            })
            .collect();
        columns.extend(outputs);
        Self::validate(&columns, None)
    }
}
