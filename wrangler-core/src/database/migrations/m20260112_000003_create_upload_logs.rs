use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UploadLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UploadLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UploadLogs::DatasetId).integer().not_null())
                    .col(ColumnDef::new(UploadLogs::Filename).string_len(255).not_null())
                    .col(ColumnDef::new(UploadLogs::FileType).string_len(16).not_null())
                    .col(
                        ColumnDef::new(UploadLogs::RowCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UploadLogs::RejectedDuplicates)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UploadLogs::RejectedErrors)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UploadLogs::UploadedAt)
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
                    .name("idx_upload_logs_dataset_filename")
                    .table(UploadLogs::Table)
                    .col(UploadLogs::DatasetId)
                    .col(UploadLogs::Filename)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UploadLogs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum UploadLogs {
    Table,
    Id,
    DatasetId,
    Filename,
    FileType,
    RowCount,
    RejectedDuplicates,
    RejectedErrors,
    UploadedAt,
}
