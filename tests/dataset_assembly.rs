mod common;

use common::*;
use dataset_builder::dataset::{
    source_label, DatasetBuilder, SaveRequest, SourceRef, TableData, UNKNOWN_SOURCE_LABEL,
};
use dataset_builder::error::BuilderError;
use dataset_builder::gateway::{ExecuteResponse, PreviewResponse};
use dataset_builder::metadata::Column;
use serde_json::json;
use std::sync::Arc;

fn builder(gateway: &Arc<ScriptedQueryGateway>, sink: &Arc<RecordingSink>) -> DatasetBuilder {
    DatasetBuilder::new(catalog(), gateway.clone(), sink.clone())
}

fn preview() -> TableData {
    TableData {
        columns: vec![Column::new("region", "string"), Column::new("total", "number")],
        rows: vec![row(json!({"region": "华东", "total": 1200}))],
    }
}

fn save_request(name: &str) -> SaveRequest {
    SaveRequest {
        name: name.to_string(),
        description: Some("  按地区汇总  ".to_string()),
        preview: Some(preview()),
        sql: "SELECT region, SUM(amount) AS total FROM orders GROUP BY region".to_string(),
        data_source_id: Some(SOURCE_ID),
    }
}

#[tokio::test]
async fn test_preview_uses_declared_columns() {
    let gateway = Arc::new(ScriptedQueryGateway::new().with_execution(Ok(ExecuteResponse::ok(
        Some(vec!["total".to_string(), "region".to_string()]),
        vec![row(json!({"region": "华北", "total": 10.5}))],
    ))));
    let sink = Arc::new(RecordingSink::default());

    let data = builder(&gateway, &sink)
        .execute_and_preview("SELECT region, total FROM t", SOURCE_ID, 100)
        .await
        .unwrap();

    assert_eq!(
        data.columns,
        vec![Column::new("total", "number"), Column::new("region", "string")]
    );
    assert_eq!(data.row_count(), 1);
    let calls = gateway.execute_calls();
    assert_eq!(calls[0].limit, 100);
    assert_eq!(calls[0].sql, "SELECT region, total FROM t");
    assert!(sink.saved().is_empty());
}

#[tokio::test]
async fn test_preview_infers_columns_from_rows() {
    let gateway = Arc::new(ScriptedQueryGateway::new().with_execution(Ok(ExecuteResponse::ok(
        None,
        vec![
            row(json!({"id": 1, "name": "Ann"})),
            row(json!({"id": 2, "name": "Bob", "vip": true})),
        ],
    ))));
    let sink = Arc::new(RecordingSink::default());

    let data = builder(&gateway, &sink)
        .execute_and_preview("SELECT * FROM customers", SOURCE_ID, 10)
        .await
        .unwrap();

    let names: Vec<&str> = data.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "vip"]);
    assert_eq!(data.columns[0].data_type, "number");
    assert_eq!(data.columns[2].data_type, "string");
}

#[tokio::test]
async fn test_preview_surfaces_execution_failure() {
    let gateway = Arc::new(ScriptedQueryGateway::new().with_failure("permission denied for table orders"));
    let sink = Arc::new(RecordingSink::default());

    let err = builder(&gateway, &sink)
        .execute_and_preview("SELECT * FROM orders", SOURCE_ID, 10)
        .await
        .unwrap_err();

    match err {
        BuilderError::Execution(message) => assert_eq!(message, "permission denied for table orders"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(gateway.execute_calls().len(), 1);
}

#[tokio::test]
async fn test_preview_unknown_source_is_catalog_error() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());

    let err = builder(&gateway, &sink)
        .execute_and_preview("SELECT 1", 404, 10)
        .await
        .unwrap_err();

    assert!(matches!(err, BuilderError::Catalog(_)));
    assert!(gateway.execute_calls().is_empty());
}

#[tokio::test]
async fn test_direct_create_builds_select_all_datasets() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());

    let datasets = builder(&gateway, &sink)
        .direct_create_from_tables(&[1, 99, 2], SOURCE_ID)
        .await
        .unwrap();

    assert_eq!(datasets.len(), 2);
    let orders = &datasets[0];
    assert_eq!(orders.name, "orders");
    assert_eq!(orders.sql, "SELECT * FROM orders");
    assert_eq!(orders.description.as_deref(), Some("订单明细"));
    assert_eq!(orders.data_source_id, SourceRef::Known(SOURCE_ID));
    assert_eq!(orders.preview.columns, warehouse().tables[0].columns);
    assert!(orders.preview.rows.is_empty());
    assert_eq!(datasets[1].sql, "SELECT * FROM customers");
    assert_ne!(datasets[0].id, datasets[1].id);
    assert!(datasets[0].created_at < datasets[1].created_at);

    assert!(gateway.execute_calls().is_empty());
    assert_eq!(sink.saved(), datasets);
}

#[tokio::test]
async fn test_direct_create_rejects_empty_or_unknown_selection() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());
    let builder = builder(&gateway, &sink);

    let err = builder.direct_create_from_tables(&[], SOURCE_ID).await.unwrap_err();
    assert!(matches!(err, BuilderError::Validation(_)));

    let err = builder.direct_create_from_tables(&[41, 42], SOURCE_ID).await.unwrap_err();
    assert!(matches!(err, BuilderError::Catalog(_)));
    assert!(sink.saved().is_empty());
}

#[test]
fn test_saving_twice_creates_two_datasets() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());
    let builder = builder(&gateway, &sink);

    let first = builder.finalize_save(save_request("地区销售"), None).unwrap();
    let second = builder.finalize_save(save_request("地区销售"), None).unwrap();

    assert_ne!(first.id, second.id);
    assert!(first.created_at < second.created_at);
    assert_eq!(first.name, second.name);
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.preview, second.preview);
    assert_eq!(first.description.as_deref(), Some("按地区汇总"));
    assert_eq!(sink.saved().len(), 2);
}

#[test]
fn test_save_validation_errors_skip_sink() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());
    let builder = builder(&gateway, &sink);

    let err = builder.finalize_save(save_request("   "), None).unwrap_err();
    assert!(matches!(err, BuilderError::Validation(_)));

    let mut request = save_request("地区销售");
    request.preview = None;
    let err = builder.finalize_save(request, None).unwrap_err();
    assert!(matches!(err, BuilderError::Validation(_)));

    assert!(sink.saved().is_empty());
}

#[test]
fn test_editing_keeps_identity() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());
    let builder = builder(&gateway, &sink);
    let original = builder.finalize_save(save_request("旧名称"), None).unwrap();

    let mut request = save_request("新名称");
    request.data_source_id = None;
    request.sql = "SELECT 1".to_string();
    let edited = builder.finalize_save(request, Some(&original)).unwrap();

    assert_eq!(edited.id, original.id);
    assert_eq!(edited.created_at, original.created_at);
    assert_eq!(edited.data_source_id, SourceRef::Known(SOURCE_ID));
    assert_eq!(edited.name, "新名称");
    assert_eq!(edited.sql, "SELECT 1");
    assert_eq!(sink.saved().last(), Some(&edited));
}

#[test]
fn test_unresolved_source_is_stored_as_unknown() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());
    let mut request = save_request("无源数据集");
    request.data_source_id = None;

    let dataset = builder(&gateway, &sink).finalize_save(request, None).unwrap();

    assert_eq!(dataset.data_source_id, SourceRef::Unknown);
    let encoded = serde_json::to_value(&dataset).unwrap();
    assert_eq!(encoded["dataSourceId"], json!(-1));
    assert_eq!(source_label(&dataset, &[warehouse()]), UNKNOWN_SOURCE_LABEL);
}

#[tokio::test]
async fn test_refresh_preview_leaves_dataset_untouched() {
    let gateway = Arc::new(ScriptedQueryGateway::new().with_execution(Ok(ExecuteResponse::ok(
        Some(vec!["region".to_string(), "total".to_string()]),
        vec![
            row(json!({"region": "华东", "total": 1300})),
            row(json!({"region": "华南", "total": 800})),
        ],
    ))));
    let sink = Arc::new(RecordingSink::default());
    let builder = builder(&gateway, &sink);
    let dataset = builder.finalize_save(save_request("地区销售"), None).unwrap();
    let before = dataset.clone();

    let fresh = builder.refresh_preview(&dataset, 50).await.unwrap();

    assert_eq!(fresh.row_count(), 2);
    assert_eq!(dataset, before);
    assert_eq!(gateway.execute_calls()[0].sql, dataset.sql);
    assert_eq!(gateway.execute_calls()[0].limit, 50);
}

#[test]
fn test_source_label_follows_catalog() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());
    let dataset = builder(&gateway, &sink).finalize_save(save_request("地区销售"), None).unwrap();

    assert_eq!(source_label(&dataset, &[warehouse()]), "warehouse");
    assert_eq!(source_label(&dataset, &[]), UNKNOWN_SOURCE_LABEL);
}

#[tokio::test]
async fn test_sample_table_uses_catalog_columns() {
    let gateway = Arc::new(ScriptedQueryGateway::new().with_preview(Ok(PreviewResponse {
        success: true,
        rows: vec![row(json!({"id": 1, "region": "华东", "amount": 99.5}))],
        message: None,
    })));
    let sink = Arc::new(RecordingSink::default());

    let data = builder(&gateway, &sink).sample_table(SOURCE_ID, 1, 5).await.unwrap();

    assert_eq!(data.columns, warehouse().tables[0].columns);
    assert_eq!(data.columns[1].alias.as_deref(), Some("地区"));
    assert_eq!(data.row_count(), 1);
    assert_eq!(
        gateway.preview_calls.lock().unwrap().clone(),
        vec![("orders".to_string(), 5)]
    );
}

#[tokio::test]
async fn test_sample_unknown_table() {
    let gateway = Arc::new(ScriptedQueryGateway::new());
    let sink = Arc::new(RecordingSink::default());

    let err = builder(&gateway, &sink).sample_table(SOURCE_ID, 3, 5).await.unwrap_err();

    assert!(matches!(err, BuilderError::Catalog(_)));
    assert!(gateway.preview_calls.lock().unwrap().is_empty());
}
