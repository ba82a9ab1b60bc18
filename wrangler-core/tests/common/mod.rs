#![allow(dead_code)]

use sea_orm::ConnectionTrait;
use wrangler::app_context::{DatasetCreateRequest, EnrichedCreateRequest};
use wrangler::config::EngineConfig;
use wrangler::database::test_utils::setup_test_db;
use wrangler::table::{ColumnDefinition, FieldValue, Row};
use wrangler::AppContext;

pub async fn context(auto_sync: bool) -> AppContext {
    let db = setup_test_db().await;
    AppContext::new(db, EngineConfig::in_memory(auto_sync))
}

pub async fn context_with(config: EngineConfig) -> AppContext {
    let db = setup_test_db().await;
    AppContext::new(db, config)
}

/// Run raw SQL against the context's database, e.g. to install a failing trigger
pub async fn execute(ctx: &AppContext, sql: &str) {
    ctx.db().execute_unprepared(sql).await.unwrap();
}

pub fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
        .collect()
}

pub fn text(value: &str) -> FieldValue {
    FieldValue::from(value)
}

pub fn dataset_request(
    slot: i32,
    name: &str,
    columns: Vec<ColumnDefinition>,
    duplicate_key: Option<&str>,
) -> DatasetCreateRequest {
    DatasetCreateRequest {
        slot,
        name: name.to_string(),
        columns,
        duplicate_key: duplicate_key.map(str::to_string),
    }
}

pub fn enriched_request(source: i32, name: &str, pairs: &[(&str, &str)]) -> EnrichedCreateRequest {
    EnrichedCreateRequest {
        source_dataset_id: source,
        name: name.to_string(),
        enrichments: pairs
            .iter()
            .map(|(c, f)| (c.to_string(), f.to_string()))
            .collect(),
    }
}

/// A contacts dataset in slot 1 keyed by `email`
pub async fn contacts(ctx: &AppContext) -> i32 {
    ctx.create_dataset(dataset_request(
        1,
        "contacts",
        vec![ColumnDefinition::text("email"), ColumnDefinition::text("value")],
        Some("email"),
    ))
    .await
    .unwrap()
    .id
}
