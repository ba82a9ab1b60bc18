use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataTables::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataTables::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DataTables::Name)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(DataTables::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(DataTables::Columns).json_binary().not_null())
                    .col(
                        ColumnDef::new(DataTables::CreatedAt)
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
                    .table(TableRows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TableRows::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TableRows::TableId).integer().not_null())
                    .col(ColumnDef::new(TableRows::RowUuid).string_len(36).not_null())
                    .col(ColumnDef::new(TableRows::Position).big_integer().not_null())
                    .col(ColumnDef::new(TableRows::SourceRowUuid).string_len(36).null())
                    .col(ColumnDef::new(TableRows::DupSignature).text().null())
                    .col(ColumnDef::new(TableRows::Data).json_binary().not_null())
                    .col(
                        ColumnDef::new(TableRows::CreatedAt)
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
                    .name("idx_table_rows_position")
                    .table(TableRows::Table)
                    .col(TableRows::TableId)
                    .col(TableRows::Position)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_table_rows_signature_unique")
                    .table(TableRows::Table)
                    .col(TableRows::TableId)
                    .col(TableRows::DupSignature)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TableRows::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DataTables::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DataTables {
    Table,
    Id,
    Name,
    Kind,
    Columns,
    CreatedAt,
}

#[derive(Iden)]
enum TableRows {
    Table,
    Id,
    TableId,
    RowUuid,
    Position,
    SourceRowUuid,
    DupSignature,
    Data,
    CreatedAt,
}
