use sea_orm::DatabaseConnection;

use super::connection::connect_and_migrate;

/// In-memory SQLite database with every migration applied
pub async fn setup_test_db() -> DatabaseConnection {
    connect_and_migrate("sqlite::memory:")
        .await
        .expect("Failed to set up test database")
}
