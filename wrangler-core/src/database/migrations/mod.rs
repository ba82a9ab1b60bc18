pub use sea_orm_migration::prelude::*;

mod m20260105_000001_create_table_storage;
mod m20260105_000002_create_dataset_registry;
mod m20260112_000003_create_upload_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260105_000001_create_table_storage::Migration),
            Box::new(m20260105_000002_create_dataset_registry::Migration),
            Box::new(m20260112_000003_create_upload_logs::Migration),
        ]
    }
}
