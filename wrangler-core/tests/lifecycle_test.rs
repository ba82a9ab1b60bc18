mod common;

use common::{context, contacts, dataset_request, enriched_request, execute, row};
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use wrangler::database::entities::{
    data_tables, datasets, enriched_datasets, schema_records, table_rows, upload_logs, SyncStatus,
};
use wrangler::errors::{DatasetError, SchemaError};
use wrangler::services::SchemaOwner;
use wrangler::table::ColumnDefinition;

#[tokio::test]
async fn test_slot_must_be_in_range() {
    let ctx = context(true).await;
    for slot in [0, 6, -1] {
        let err = ctx
            .create_dataset(dataset_request(
                slot,
                "bad",
                vec![ColumnDefinition::text("a")],
                None,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidSlot { max: 5, .. }));
    }
}

#[tokio::test]
async fn test_slot_and_name_are_unique() {
    let ctx = context(true).await;
    contacts(&ctx).await;

    let err = ctx
        .create_dataset(dataset_request(
            1,
            "other",
            vec![ColumnDefinition::text("a")],
            None,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::SlotOccupied { slot: 1, .. }));

    let err = ctx
        .create_dataset(dataset_request(
            2,
            "contacts",
            vec![ColumnDefinition::text("a")],
            None,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_invalid_schema_creates_nothing() {
    let ctx = context(true).await;
    let err = ctx
        .create_dataset(dataset_request(
            1,
            "prices",
            vec![ColumnDefinition::real("price")],
            Some("price"),
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DatasetError::Schema(SchemaError::RealDuplicateKey(_))
    ));

    assert_eq!(datasets::Entity::find().count(ctx.db()).await.unwrap(), 0);
    assert_eq!(data_tables::Entity::find().count(ctx.db()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_created_dataset_has_schema_and_table() {
    let ctx = context(true).await;
    let summary = ctx
        .create_dataset(dataset_request(
            3,
            "Customer List",
            vec![
                ColumnDefinition::text("email"),
                ColumnDefinition::integer("age"),
            ],
            Some("email"),
        ))
        .await
        .unwrap();

    assert_eq!(summary.slot, 3);
    assert_eq!(summary.duplicate_key.as_deref(), Some("email"));
    assert_eq!(summary.schema_version, 1);
    assert_eq!(summary.row_count, 0);

    let table = data_tables::Entity::find_by_id(summary.table_id)
        .one(ctx.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(table.name, "dataset_3_customer_list");

    let listed = ctx.list_datasets().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "Customer List");
}

#[tokio::test]
async fn test_cascade_delete_leaves_no_residue() {
    let ctx = context(true).await;
    let source = ctx
        .create_dataset(dataset_request(
            1,
            "people",
            vec![ColumnDefinition::text("phone"), ColumnDefinition::text("site")],
            None,
        ))
        .await
        .unwrap()
        .id;
    ctx.merge_rows(
        source,
        vec![
            row(&[("phone", "(555) 123-4567"), ("site", "https://example.com")]),
            row(&[("phone", "n/a"), ("site", "example.org")]),
        ],
    )
    .await
    .unwrap();
    ctx.import_csv(source, "more.csv", b"phone,site\n555 000 1111,x.io\n")
        .await
        .unwrap();
    let phones = ctx
        .create_enriched_dataset(enriched_request(source, "phones", &[("phone", "phone_normalize")]))
        .await
        .unwrap();
    let sites = ctx
        .create_enriched_dataset(enriched_request(source, "sites", &[("site", "url_domain")]))
        .await
        .unwrap();
    assert_ne!(phones.table_id, sites.table_id);

    let summary = ctx.delete_dataset(source).await.unwrap();
    assert_eq!(summary.tables_dropped, 3);
    assert_eq!(summary.rows_deleted, 9);
    assert_eq!(summary.dataset_dropped, Some(source));
    assert_eq!(summary.enriched_dropped.len(), 2);

    let db = ctx.db();
    assert_eq!(data_tables::Entity::find().count(db).await.unwrap(), 0);
    assert_eq!(table_rows::Entity::find().count(db).await.unwrap(), 0);
    assert_eq!(datasets::Entity::find().count(db).await.unwrap(), 0);
    assert_eq!(enriched_datasets::Entity::find().count(db).await.unwrap(), 0);
    assert_eq!(schema_records::Entity::find().count(db).await.unwrap(), 0);
    assert_eq!(upload_logs::Entity::find().count(db).await.unwrap(), 0);
    assert!(ctx.check_integrity().await.unwrap().is_clean());
}

#[tokio::test]
async fn test_deleting_enriched_keeps_source() {
    let ctx = context(true).await;
    let source = contacts(&ctx).await;
    ctx.merge_rows(source, vec![row(&[("email", "a@x.com"), ("value", "1")])])
        .await
        .unwrap();
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "checked", &[("email", "email_validate")]))
        .await
        .unwrap();

    ctx.delete_enriched_dataset(enriched.id).await.unwrap();

    assert!(matches!(
        ctx.get_enriched_dataset(enriched.id).await.unwrap_err(),
        DatasetError::EnrichedNotFound(_)
    ));
    let dataset = ctx.get_dataset(source).await.unwrap();
    assert_eq!(dataset.row_count, 1);
    assert!(ctx.list_enriched_datasets(Some(source)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enriching_empty_source_is_rejected() {
    let ctx = context(true).await;
    let source = contacts(&ctx).await;
    let err = ctx
        .create_enriched_dataset(enriched_request(source, "checked", &[("email", "email_validate")]))
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::EmptySource(id) if id == source));
}

#[tokio::test]
async fn test_enrichment_spec_is_validated() {
    let ctx = context(true).await;
    let source = contacts(&ctx).await;
    ctx.merge_rows(source, vec![row(&[("email", "a@x.com"), ("value", "1")])])
        .await
        .unwrap();

    let err = ctx
        .create_enriched_dataset(enriched_request(source, "bad", &[("email", "shout")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DatasetError::Schema(SchemaError::UnknownEnrichmentFunction(_))
    ));

    let err = ctx
        .create_enriched_dataset(enriched_request(source, "bad", &[("phone", "phone_normalize")]))
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::Schema(SchemaError::UnknownColumn(_))));

    assert!(ctx.list_enriched_datasets(None).await.unwrap().is_empty());
    assert_eq!(data_tables::Entity::find().count(ctx.db()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_enriched_tables_are_versioned() {
    let ctx = context(true).await;
    let source = contacts(&ctx).await;
    ctx.merge_rows(source, vec![row(&[("email", "a@x.com"), ("value", "1")])])
        .await
        .unwrap();

    let first = ctx
        .create_enriched_dataset(enriched_request(source, "one", &[("email", "email_validate")]))
        .await
        .unwrap();
    let second = ctx
        .create_enriched_dataset(enriched_request(source, "two", &[("email", "email_validate")]))
        .await
        .unwrap();

    let mut names = Vec::new();
    for table_id in [first.table_id, second.table_id] {
        let table = data_tables::Entity::find_by_id(table_id)
            .one(ctx.db())
            .await
            .unwrap()
            .unwrap();
        names.push(table.name);
    }
    assert_eq!(
        names,
        vec![
            "enriched_dataset_1_contacts_v1".to_string(),
            "enriched_dataset_1_contacts_v2".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_image_columns_can_be_flagged_manually() {
    let ctx = context(true).await;
    let source = contacts(&ctx).await;
    ctx.merge_rows(source, vec![row(&[("email", "a@x.com"), ("value", "1")])])
        .await
        .unwrap();

    let flagged = ctx
        .update_image_columns(source, &["value".to_string()])
        .await
        .unwrap();
    assert_eq!(flagged, vec!["value".to_string()]);

    let schema = ctx
        .schema_registry()
        .schema_for(SchemaOwner::Dataset(source))
        .await
        .unwrap();
    assert_eq!(schema.version, 2);
    assert_eq!(schema.image_columns(), vec!["value".to_string()]);

    let err = ctx
        .update_image_columns(source, &["missing".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::Schema(SchemaError::UnknownColumn(_))));
}

#[tokio::test]
async fn test_schema_is_frozen_once_rows_exist() {
    let ctx = context(true).await;
    let source = contacts(&ctx).await;
    ctx.merge_rows(source, vec![row(&[("email", "a@x.com"), ("value", "1")])])
        .await
        .unwrap();

    let err = ctx
        .schema_registry()
        .register(
            SchemaOwner::Dataset(source),
            &[ColumnDefinition::text("email"), ColumnDefinition::integer("value")],
            Some("email"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchemaError::Immutable(_)));
}

#[tokio::test]
async fn test_integrity_cleanup_marks_broken_enriched_datasets() {
    let ctx = context(true).await;
    let source = contacts(&ctx).await;
    ctx.merge_rows(source, vec![row(&[("email", "a@x.com"), ("value", "1")])])
        .await
        .unwrap();
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "checked", &[("email", "email_validate")]))
        .await
        .unwrap();

    datasets::Entity::delete_by_id(source)
        .exec(ctx.db())
        .await
        .unwrap();

    let report = ctx.check_integrity().await.unwrap();
    assert_eq!(report.enriched_missing_source, vec![enriched.id]);
    assert_eq!(report.orphaned_tables.len(), 1);
    assert_eq!(report.orphaned_schemas.len(), 1);

    let cleaned = ctx.cleanup_integrity(false).await.unwrap();
    assert_eq!(cleaned.tables_removed, 1);
    assert_eq!(cleaned.schemas_removed, 1);
    assert_eq!(cleaned.enriched_marked_error, 1);

    let status = ctx.enriched_status(enriched.id).await.unwrap();
    assert_eq!(status.status, SyncStatus::SyncError);
}

/// Table records, stored rows, schema records and upload logs
async fn residue(db: &DatabaseConnection) -> (u64, u64, u64, u64) {
    (
        data_tables::Entity::find().count(db).await.unwrap(),
        table_rows::Entity::find().count(db).await.unwrap(),
        schema_records::Entity::find().count(db).await.unwrap(),
        upload_logs::Entity::find().count(db).await.unwrap(),
    )
}

#[tokio::test]
async fn test_failed_cascade_delete_removes_nothing() {
    let ctx = context(true).await;
    let source = contacts(&ctx).await;
    ctx.import_csv(source, "contacts.csv", b"email,value\na@x.com,1\nb@x.com,2\n")
        .await
        .unwrap();
    let enriched = ctx
        .create_enriched_dataset(enriched_request(source, "checked", &[("email", "email_validate")]))
        .await
        .unwrap();

    let before = residue(ctx.db()).await;
    assert_eq!(before, (2, 4, 2, 1));

    // the last step of the cascade fails
    execute(
        &ctx,
        "CREATE TRIGGER keep_datasets BEFORE DELETE ON datasets \
         BEGIN SELECT RAISE(ABORT, 'datasets are locked'); END",
    )
    .await;
    let err = ctx.delete_dataset(source).await.unwrap_err();
    assert!(!err.is_client_error());

    assert_eq!(residue(ctx.db()).await, before);
    assert_eq!(ctx.get_dataset(source).await.unwrap().row_count, 2);
    let kept = ctx.get_enriched_dataset(enriched.id).await.unwrap();
    assert_eq!(kept.row_count, 2);
    assert_eq!(kept.sync_status, SyncStatus::InSync);

    execute(&ctx, "DROP TRIGGER keep_datasets").await;
    let summary = ctx.delete_dataset(source).await.unwrap();
    assert_eq!(summary.enriched_dropped, vec![enriched.id]);
    assert_eq!(residue(ctx.db()).await, (0, 0, 0, 0));
}
