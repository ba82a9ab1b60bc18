mod common;

use common::{context, context_with, contacts, dataset_request, enriched_request, execute, row, text};
use wrangler::config::EngineConfig;
use wrangler::database::entities::SyncStatus;
use wrangler::errors::{DatasetError, RowErrorKind};
use wrangler::services::SchemaOwner;
use wrangler::table::{ColumnDefinition, FieldValue};

#[tokio::test]
async fn test_email_key_rejects_already_stored_rows() {
    let ctx = context(true).await;
    let dataset_id = contacts(&ctx).await;

    let first = ctx
        .merge_rows(
            dataset_id,
            vec![
                row(&[("email", "a@x.com"), ("value", "1")]),
                row(&[("email", "b@x.com"), ("value", "2")]),
            ],
        )
        .await
        .unwrap();
    assert_eq!(first.accepted, 2);
    assert_eq!(first.rejected_duplicates, 0);

    let second = ctx
        .merge_rows(
            dataset_id,
            vec![
                row(&[("email", "a@x.com"), ("value", "3")]),
                row(&[("email", "c@x.com"), ("value", "4")]),
            ],
        )
        .await
        .unwrap();
    assert_eq!(second.accepted, 1);
    assert_eq!(second.rejected_duplicates, 1);

    let page = ctx
        .load_rows(SchemaOwner::Dataset(dataset_id), 0, None)
        .await
        .unwrap();
    assert_eq!(page.total_rows, 3);
    let pairs: Vec<(FieldValue, FieldValue)> = page
        .rows
        .iter()
        .map(|r| (r.values["email"].clone(), r.values["value"].clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (text("a@x.com"), text("1")),
            (text("b@x.com"), text("2")),
            (text("c@x.com"), text("4")),
        ]
    );
}

#[tokio::test]
async fn test_remerging_same_batch_with_key_accepts_nothing() {
    let ctx = context(true).await;
    let dataset_id = contacts(&ctx).await;
    let batch = vec![
        row(&[("email", "a@x.com"), ("value", "1")]),
        row(&[("email", "b@x.com"), ("value", "2")]),
        row(&[("email", "c@x.com"), ("value", "3")]),
    ];

    ctx.merge_rows(dataset_id, batch.clone()).await.unwrap();
    let again = ctx.merge_rows(dataset_id, batch.clone()).await.unwrap();

    assert_eq!(again.accepted, 0);
    assert_eq!(again.rejected_duplicates, batch.len());
    assert!(again.errors.is_empty());
}

#[tokio::test]
async fn test_without_key_same_batch_is_stored_twice() {
    let ctx = context(true).await;
    let dataset_id = ctx
        .create_dataset(dataset_request(
            2,
            "events",
            vec![ColumnDefinition::text("kind"), ColumnDefinition::integer("count")],
            None,
        ))
        .await
        .unwrap()
        .id;
    let batch = vec![
        row(&[("kind", "click"), ("count", "1")]),
        row(&[("kind", "click"), ("count", "1")]),
    ];

    let first = ctx.merge_rows(dataset_id, batch.clone()).await.unwrap();
    let second = ctx.merge_rows(dataset_id, batch).await.unwrap();

    assert_eq!(first.accepted, 2);
    assert_eq!(second.accepted, 2);
    assert_eq!(second.rejected_duplicates, 0);
    let stats = ctx.dataset_statistics(dataset_id).await.unwrap();
    assert_eq!(stats.total_rows, 4);
}

#[tokio::test]
async fn test_duplicates_within_one_batch_keep_first() {
    let ctx = context(true).await;
    let dataset_id = contacts(&ctx).await;

    let result = ctx
        .merge_rows(
            dataset_id,
            vec![
                row(&[("email", "a@x.com"), ("value", "first")]),
                row(&[("email", "a@x.com"), ("value", "second")]),
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.accepted, 1);
    assert_eq!(result.rejected_duplicates, 1);

    let page = ctx
        .load_rows(SchemaOwner::Dataset(dataset_id), 0, None)
        .await
        .unwrap();
    assert_eq!(page.rows[0].values["value"], text("first"));
}

#[tokio::test]
async fn test_null_keys_never_count_as_duplicates() {
    let ctx = context(true).await;
    let dataset_id = contacts(&ctx).await;

    let result = ctx
        .merge_rows(
            dataset_id,
            vec![row(&[("value", "1")]), row(&[("value", "2")])],
        )
        .await
        .unwrap();
    assert_eq!(result.accepted, 2);
    assert_eq!(result.rejected_duplicates, 0);
}

#[tokio::test]
async fn test_bad_rows_are_reported_and_the_rest_merged() {
    let ctx = context(true).await;
    let dataset_id = ctx
        .create_dataset(dataset_request(
            3,
            "scores",
            vec![
                ColumnDefinition::integer("id"),
                ColumnDefinition::real("score"),
            ],
            Some("id"),
        ))
        .await
        .unwrap()
        .id;

    let result = ctx
        .merge_rows(
            dataset_id,
            vec![
                row(&[("id", "1"), ("score", "2.5")]),
                row(&[("id", "two"), ("score", "3.0")]),
                row(&[("id", "3"), ("grade", "A")]),
                row(&[("id", "4"), ("score", "")]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.accepted, 2);
    assert_eq!(result.errors.len(), 2);
    assert_eq!(result.errors[0].row_index, 1);
    assert!(matches!(
        result.errors[0].kind,
        RowErrorKind::TypeCoercion { .. }
    ));
    assert_eq!(result.errors[1].row_index, 2);
    assert_eq!(result.errors[1].kind, RowErrorKind::UnknownColumn);

    let page = ctx
        .load_rows(SchemaOwner::Dataset(dataset_id), 0, None)
        .await
        .unwrap();
    assert_eq!(page.rows[0].values["id"], FieldValue::Integer(1));
    assert_eq!(page.rows[0].values["score"], FieldValue::Real(2.5));
    assert_eq!(page.rows[1].values["score"], FieldValue::Null);
}

#[tokio::test]
async fn test_image_columns_are_flagged_on_ingest() {
    let ctx = context(true).await;
    let dataset_id = ctx
        .create_dataset(dataset_request(
            1,
            "gallery",
            vec![ColumnDefinition::text("title"), ColumnDefinition::text("photo")],
            None,
        ))
        .await
        .unwrap()
        .id;
    let image = format!("data:image/png;base64,{}", "A".repeat(200));

    let result = ctx
        .merge_rows(
            dataset_id,
            vec![row(&[("title", "sunset"), ("photo", image.as_str())])],
        )
        .await
        .unwrap();
    assert_eq!(result.image_columns_flagged, vec!["photo".to_string()]);

    let stats = ctx.dataset_statistics(dataset_id).await.unwrap();
    assert_eq!(stats.image_columns, vec!["photo".to_string()]);

    let again = ctx
        .merge_rows(
            dataset_id,
            vec![row(&[("title", "dawn"), ("photo", image.as_str())])],
        )
        .await
        .unwrap();
    assert!(again.image_columns_flagged.is_empty());
}

#[tokio::test]
async fn test_merge_into_unknown_dataset() {
    let ctx = context(true).await;
    let err = ctx
        .merge_rows(42, vec![row(&[("email", "a@x.com")])])
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::NotFound(42)));
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let ctx = context(true).await;
    let dataset_id = contacts(&ctx).await;
    let result = ctx.merge_rows(dataset_id, Vec::new()).await.unwrap();
    assert_eq!(result.accepted, 0);
    assert_eq!(result.rejected(), 0);
}

#[tokio::test]
async fn test_storage_failure_mid_batch_leaves_nothing_behind() {
    let mut config = EngineConfig::in_memory(false);
    config.insert_chunk_size = 1;
    let ctx = context_with(config).await;
    let dataset_id = contacts(&ctx).await;
    ctx.merge_rows(dataset_id, vec![row(&[("email", "a@x.com"), ("value", "1")])])
        .await
        .unwrap();
    let enriched = ctx
        .create_enriched_dataset(enriched_request(dataset_id, "checked", &[("email", "email_validate")]))
        .await
        .unwrap();
    let table_id = ctx.get_dataset(dataset_id).await.unwrap().table_id;

    // the third row of the next batch hits a failing insert
    execute(
        &ctx,
        &format!(
            "CREATE TRIGGER reject_fourth_row BEFORE INSERT ON table_rows \
             WHEN NEW.table_id = {table_id} \
             AND (SELECT COUNT(*) FROM table_rows WHERE table_id = {table_id}) >= 3 \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END"
        ),
    )
    .await;

    let err = ctx
        .merge_rows(
            dataset_id,
            vec![
                row(&[("email", "b@x.com"), ("value", "2")]),
                row(&[("email", "c@x.com"), ("value", "3")]),
                row(&[("email", "d@x.com"), ("value", "4")]),
            ],
        )
        .await
        .unwrap_err();
    assert!(!err.is_client_error());

    let page = ctx
        .load_rows(SchemaOwner::Dataset(dataset_id), 0, None)
        .await
        .unwrap();
    assert_eq!(page.total_rows, 1);
    assert_eq!(page.rows[0].values["email"], text("a@x.com"));
    let status = ctx.enriched_status(enriched.id).await.unwrap();
    assert_eq!(status.status, SyncStatus::InSync);

    execute(&ctx, "DROP TRIGGER reject_fourth_row").await;
    let retried = ctx
        .merge_rows(
            dataset_id,
            vec![
                row(&[("email", "b@x.com"), ("value", "2")]),
                row(&[("email", "c@x.com"), ("value", "3")]),
                row(&[("email", "d@x.com"), ("value", "4")]),
            ],
        )
        .await
        .unwrap();
    assert_eq!(retried.accepted, 3);
    assert_eq!(retried.rejected_duplicates, 0);
}
