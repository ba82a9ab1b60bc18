use anyhow::Result;
use clap::Subcommand;
use sea_orm_migration::MigratorTrait;
use tracing::info;

use wrangler::database::connection::establish_connection;
use wrangler::database::migrations::Migrator;

#[derive(Subcommand, Debug)]
pub enum MigrateDirection {
    Up,
    Down,
    Fresh,
}

pub async fn init_database(database_url: &str) -> Result<()> {
    let db = establish_connection(database_url).await?;
    Migrator::up(&db, None).await?;
    info!("Database initialized at {}", database_url);
    Ok(())
}

pub async fn migrate_database(database_url: &str, direction: MigrateDirection) -> Result<()> {
    let db = establish_connection(database_url).await?;

    match direction {
        MigrateDirection::Up => {
            info!("Running migrations up");
            Migrator::up(&db, None).await?;
        }
        MigrateDirection::Down => {
            info!("Running migrations down");
            Migrator::down(&db, None).await?;
        }
        MigrateDirection::Fresh => {
            info!("Running fresh migrations (down then up)");
            Migrator::down(&db, None).await?;
            Migrator::up(&db, None).await?;
        }
    }

    info!("Database migration completed");
    Ok(())
}
