use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

use super::migrations::Migrator;

const SQLITE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url);

    if is_sqlite_url(database_url) {
        // One connection per engine: writers on different slots queue for it
        // instead of failing with SQLITE_BUSY, and `sqlite::memory:` stays a
        // single database. A long recompute can hold it for a while.
        opt.max_connections(1)
            .min_connections(1)
            .acquire_timeout(SQLITE_ACQUIRE_TIMEOUT);
    } else {
        opt.max_connections(20)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(5));
    }

    opt.connect_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(3600))
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug);

    Database::connect(opt).await
}

/// Connect and bring the schema up to date
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = establish_connection(database_url).await?;
    Migrator::up(&db, None).await?;
    info!("Database ready at {}", database_url);
    Ok(db)
}

pub fn get_database_url(database_path: Option<&str>) -> String {
    match database_path {
        Some(":memory:") => "sqlite::memory:".to_string(),
        Some(path) => format!("sqlite://{}?mode=rwc", path),
        None => "sqlite://wrangler.db?mode=rwc".to_string(),
    }
}

fn is_sqlite_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite:")
}
