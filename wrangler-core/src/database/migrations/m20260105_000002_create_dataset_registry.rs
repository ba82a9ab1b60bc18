use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Datasets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Datasets::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Datasets::Slot).integer().not_null().unique_key())
                    .col(
                        ColumnDef::new(Datasets::Name)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Datasets::TableId).integer().not_null())
                    .col(
                        ColumnDef::new(Datasets::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Datasets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SchemaRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SchemaRecords::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SchemaRecords::OwnerKind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SchemaRecords::OwnerId).integer().not_null())
                    .col(
                        ColumnDef::new(SchemaRecords::Columns)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SchemaRecords::DuplicateKey).string_len(255).null())
                    .col(
                        ColumnDef::new(SchemaRecords::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(SchemaRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SchemaRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schema_records_owner_unique")
                    .table(SchemaRecords::Table)
                    .col(SchemaRecords::OwnerKind)
                    .col(SchemaRecords::OwnerId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EnrichedDatasets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EnrichedDatasets::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EnrichedDatasets::Name)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(EnrichedDatasets::SourceDatasetId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(EnrichedDatasets::TableId).integer().not_null())
                    .col(
                        ColumnDef::new(EnrichedDatasets::EnrichmentSpec)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EnrichedDatasets::ColumnsAdded)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EnrichedDatasets::SyncStatus)
                            .string_len(16)
                            .not_null()
                            .default("IN_SYNC"),
                    )
                    .col(
                        ColumnDef::new(EnrichedDatasets::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(EnrichedDatasets::LastError).text().null())
                    .col(
                        ColumnDef::new(EnrichedDatasets::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EnrichedDatasets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_enriched_datasets_source")
                    .table(EnrichedDatasets::Table)
                    .col(EnrichedDatasets::SourceDatasetId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EnrichedDatasets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SchemaRecords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Datasets::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Datasets {
    Table,
    Id,
    Slot,
    Name,
    TableId,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum SchemaRecords {
    Table,
    Id,
    OwnerKind,
    OwnerId,
    Columns,
    DuplicateKey,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum EnrichedDatasets {
    Table,
    Id,
    Name,
    SourceDatasetId,
    TableId,
    EnrichmentSpec,
    ColumnsAdded,
    SyncStatus,
    LastSyncedAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
