mod common;

use common::{context, context_with, dataset_request, enriched_request, execute, row, text};
use sea_orm::EntityTrait;
use wrangler::config::EngineConfig;
use wrangler::database::entities::{datasets, SyncStatus};
use wrangler::services::{SchemaOwner, TableLifecycleManager};
use wrangler::table::{ColumnDefinition, FieldValue};
use wrangler::AppContext;

async fn people(ctx: &AppContext) -> i32 {
    let id = ctx
        .create_dataset(dataset_request(
            1,
            "people",
            vec![
                ColumnDefinition::text("name"),
                ColumnDefinition::text("phone"),
                ColumnDefinition::text("email"),
            ],
            Some("email"),
        ))
        .await
        .unwrap()
        .id;
    ctx.merge_rows(
        id,
        vec![
            row(&[("name", "Ann"), ("phone", "(555) 123-4567"), ("email", "ann@x.com")]),
            row(&[("name", "Bob"), ("phone", "555.987.6543"), ("email", "bob@x.com")]),
        ],
    )
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn test_created_enriched_dataset_is_in_sync() {
    let ctx = context(true).await;
    let source = people(&ctx).await;

    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "people+", &[("phone", "phone_normalize")]))
        .await
        .unwrap();
    assert_eq!(enriched.sync_status, SyncStatus::InSync);
    assert_eq!(enriched.row_count, 2);
    assert_eq!(
        enriched.columns_added,
        vec![
            "phone_enriched_phone_normalize".to_string(),
            "phone_enriched_phone_normalize_valid".to_string(),
        ]
    );

    let page = ctx
        .load_rows(SchemaOwner::Enriched(enriched.id), 0, None)
        .await
        .unwrap();
    assert_eq!(page.rows[0].values["name"], text("Ann"));
    assert_eq!(
        page.rows[0].values["phone_enriched_phone_normalize_valid"],
        FieldValue::Integer(1)
    );
    assert!(page.rows.iter().all(|r| r.source_row_uuid.is_some()));
}

#[tokio::test]
async fn test_manual_sync_is_idempotent() {
    let ctx = context(true).await;
    let source = people(&ctx).await;
    let enriched = ctx
        .create_enriched_dataset(enriched_request(
            source,
            "people+",
            &[("phone", "phone_normalize"), ("email", "email_validate")],
        ))
        .await
        .unwrap();

    let first = ctx.sync_enriched_dataset(enriched.id).await.unwrap();
    let rows_first = ctx
        .load_rows(SchemaOwner::Enriched(enriched.id), 0, None)
        .await
        .unwrap();
    let second = ctx.sync_enriched_dataset(enriched.id).await.unwrap();
    let rows_second = ctx
        .load_rows(SchemaOwner::Enriched(enriched.id), 0, None)
        .await
        .unwrap();

    assert_eq!(first.status, SyncStatus::InSync);
    assert_eq!(second.status, SyncStatus::InSync);
    let values = |page: &wrangler::app_context::RowPage| -> Vec<_> {
        page.rows
            .iter()
            .map(|r| (r.source_row_uuid.clone(), r.values.clone()))
            .collect()
    };
    assert_eq!(values(&rows_first), values(&rows_second));
}

#[tokio::test]
async fn test_mutation_marks_stale_until_synced() {
    let ctx = context(false).await;
    let source = people(&ctx).await;
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "people+", &[("phone", "phone_normalize")]))
        .await
        .unwrap();

    let merged = ctx
        .merge_rows(
            source,
            vec![row(&[("name", "Cy"), ("phone", "555 000 1111"), ("email", "cy@x.com")])],
        )
        .await
        .unwrap();
    assert!(merged.sync_reports.is_empty());
    let status = ctx.enriched_status(enriched.id).await.unwrap();
    assert_eq!(status.status, SyncStatus::Stale);

    let report = ctx.sync_enriched_dataset(enriched.id).await.unwrap();
    assert_eq!(report.status, SyncStatus::InSync);
    assert_eq!(report.rows_written, 3);
    assert_eq!(report.fields_malformed, 0);
    let status = ctx.enriched_status(enriched.id).await.unwrap();
    assert_eq!(status.status, SyncStatus::InSync);
    assert!(status.last_synced_at.is_some());
}

#[tokio::test]
async fn test_rejected_only_merge_keeps_in_sync() {
    let ctx = context(false).await;
    let source = people(&ctx).await;
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "people+", &[("phone", "phone_normalize")]))
        .await
        .unwrap();

    let merged = ctx
        .merge_rows(
            source,
            vec![row(&[("name", "Ann"), ("phone", "1"), ("email", "ann@x.com")])],
        )
        .await
        .unwrap();
    assert_eq!(merged.accepted, 0);
    let status = ctx.enriched_status(enriched.id).await.unwrap();
    assert_eq!(status.status, SyncStatus::InSync);
}

#[tokio::test]
async fn test_auto_sync_runs_after_merge() {
    let ctx = context(true).await;
    let source = people(&ctx).await;
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "people+", &[("phone", "phone_normalize")]))
        .await
        .unwrap();

    let merged = ctx
        .merge_rows(
            source,
            vec![row(&[("name", "Cy"), ("phone", "555 000 1111"), ("email", "cy@x.com")])],
        )
        .await
        .unwrap();
    assert_eq!(merged.sync_reports.len(), 1);
    assert_eq!(merged.sync_reports[0].status, SyncStatus::InSync);

    let summary = ctx.get_enriched_dataset(enriched.id).await.unwrap();
    assert_eq!(summary.sync_status, SyncStatus::InSync);
    assert_eq!(summary.row_count, 3);
}

#[tokio::test]
async fn test_malformed_phone_keeps_value_and_stays_in_sync() {
    let ctx = context(true).await;
    let source = ctx
        .create_dataset(dataset_request(
            2,
            "phones",
            vec![ColumnDefinition::text("phone")],
            None,
        ))
        .await
        .unwrap()
        .id;
    ctx.merge_rows(source, vec![row(&[("phone", "not-a-number")])])
        .await
        .unwrap();

    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "phones+", &[("phone", "phone_normalize")]))
        .await
        .unwrap();
    assert_eq!(enriched.sync_status, SyncStatus::InSync);

    let page = ctx
        .load_rows(SchemaOwner::Enriched(enriched.id), 0, None)
        .await
        .unwrap();
    let derived = &page.rows[0].values;
    assert_eq!(derived["phone"], text("not-a-number"));
    assert_eq!(derived["phone_enriched_phone_normalize"], FieldValue::Null);
    assert_eq!(
        derived["phone_enriched_phone_normalize_valid"],
        FieldValue::Integer(0)
    );

    let report = ctx.sync_enriched_dataset(enriched.id).await.unwrap();
    assert_eq!(report.status, SyncStatus::InSync);
    assert_eq!(report.fields_malformed, 1);
    assert_eq!(report.diagnostics.len(), 1);
}

#[tokio::test]
async fn test_sync_after_source_vanished_reports_sync_error() {
    let ctx = context(true).await;
    let source = people(&ctx).await;
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "people+", &[("phone", "phone_normalize")]))
        .await
        .unwrap();

    datasets::Entity::delete_by_id(source)
        .exec(ctx.db())
        .await
        .unwrap();

    let report = ctx.sync_enriched_dataset(enriched.id).await.unwrap();
    assert_eq!(report.status, SyncStatus::SyncError);
    assert!(report.error.as_deref().unwrap().contains("no longer exists"));

    let status = ctx.enriched_status(enriched.id).await.unwrap();
    assert_eq!(status.status, SyncStatus::SyncError);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn test_missing_derived_table_parks_dataset_in_sync_error() {
    let ctx = context(true).await;
    let source = people(&ctx).await;
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "people+", &[("phone", "phone_normalize")]))
        .await
        .unwrap();

    TableLifecycleManager::drop_storage_in(ctx.db(), enriched.table_id)
        .await
        .unwrap();

    let report = ctx.sync_enriched_dataset(enriched.id).await.unwrap();
    assert_eq!(report.status, SyncStatus::SyncError);

    // automatic sync leaves SYNC_ERROR alone
    let merged = ctx
        .merge_rows(
            source,
            vec![row(&[("name", "Cy"), ("phone", "555 000 1111"), ("email", "cy@x.com")])],
        )
        .await
        .unwrap();
    assert_eq!(merged.accepted, 1);
    assert!(merged.sync_reports.is_empty());
    let status = ctx.enriched_status(enriched.id).await.unwrap();
    assert_eq!(status.status, SyncStatus::SyncError);
    assert_eq!(
        status.last_error.as_deref(),
        Some(format!("Enriched table {} no longer exists", enriched.table_id).as_str())
    );
}

#[tokio::test]
async fn test_failure_ratio_policy_escalates() {
    let mut config = EngineConfig::in_memory(true);
    config.sync.max_field_failure_ratio = Some(0.5);
    let ctx = context_with(config).await;

    let source = ctx
        .create_dataset(dataset_request(
            1,
            "phones",
            vec![ColumnDefinition::text("phone")],
            None,
        ))
        .await
        .unwrap()
        .id;
    ctx.merge_rows(source, vec![row(&[("phone", "(555) 123-4567")])])
        .await
        .unwrap();
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "phones+", &[("phone", "phone_normalize")]))
        .await
        .unwrap();
    assert_eq!(enriched.sync_status, SyncStatus::InSync);

    let merged = ctx
        .merge_rows(
            source,
            vec![row(&[("phone", "nope")]), row(&[("phone", "never")])],
        )
        .await
        .unwrap();
    assert_eq!(merged.sync_reports.len(), 1);
    assert_eq!(merged.sync_reports[0].status, SyncStatus::SyncError);

    // SYNC_ERROR is not retried automatically
    let merged = ctx
        .merge_rows(source, vec![row(&[("phone", "(555) 765-4321")])])
        .await
        .unwrap();
    assert!(merged.sync_reports.is_empty());
    let status = ctx.enriched_status(enriched.id).await.unwrap();
    assert_eq!(status.status, SyncStatus::SyncError);
}

#[tokio::test]
async fn test_sync_all_for_source() {
    let ctx = context(false).await;
    let source = people(&ctx).await;
    ctx.create_enriched_dataset(enriched_request(source, "phones", &[("phone", "phone_normalize")]))
        .await
        .unwrap();
    ctx.create_enriched_dataset(enriched_request(source, "emails", &[("email", "email_validate")]))
        .await
        .unwrap();

    let reports = ctx.sync_all_for_source(source).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.status == SyncStatus::InSync));
}

#[tokio::test]
async fn test_sync_all_continues_past_storage_failure() {
    let ctx = context(false).await;
    let source = people(&ctx).await;
    let phones = ctx
        .create_enriched_dataset(enriched_request(source, "phones", &[("phone", "phone_normalize")]))
        .await
        .unwrap();
    let emails = ctx
        .create_enriched_dataset(enriched_request(source, "emails", &[("email", "email_validate")]))
        .await
        .unwrap();
    ctx.merge_rows(
        source,
        vec![row(&[("name", "Cy"), ("phone", "555 000 1111"), ("email", "cy@x.com")])],
    )
    .await
    .unwrap();

    // rewriting the first derived table fails
    execute(
        &ctx,
        &format!(
            "CREATE TRIGGER reject_phone_rows BEFORE INSERT ON table_rows \
             WHEN NEW.table_id = {} \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
            phones.table_id
        ),
    )
    .await;

    let err = ctx.sync_all_for_source(source).await.unwrap_err();
    assert!(!err.is_client_error());

    let failed = ctx.get_enriched_dataset(phones.id).await.unwrap();
    assert_eq!(failed.sync_status, SyncStatus::SyncError);
    assert!(failed.last_error.is_some());
    assert_eq!(failed.row_count, 2);

    let synced = ctx.get_enriched_dataset(emails.id).await.unwrap();
    assert_eq!(synced.sync_status, SyncStatus::InSync);
    assert_eq!(synced.row_count, 3);
}
