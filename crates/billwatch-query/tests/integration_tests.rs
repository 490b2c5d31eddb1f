//! Integration tests for billwatch-query against in-memory rows and a mock
//! BigQuery server.

use billwatch_core::{BigQueryConfig, BillingError};
use billwatch_query::{
    BigQueryExecutor, BillingQuery, Columns, InMemoryExecutor, QuerySpec, RowSet, Value, record,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

const TABLE: &str = "acme-prod.billing.gcp_billing_export_v1_01";

fn billing_rows() -> RowSet {
    let ts = |d, h| Value::from(Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap());
    let at_cutoff = Value::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let just_before = Value::from(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
    let service = |name: &str| record([("description", name)]);

    RowSet::from_rows(
        vec!["usage_end_time".into(), "cost".into(), "service".into()],
        vec![
            vec![ts(2, 5), Value::Float(1.5), service("Compute Engine")],
            vec![at_cutoff, Value::Float(0.01), service("Cloud Storage")],
            vec![just_before, Value::Float(9.0), service("Compute Engine")],
            vec![ts(1, 12), Value::Float(0.0), service("BigQuery")],
            vec![ts(3, 1), Value::Float(-0.5), service("Compute Engine")],
            vec![ts(1, 6), Value::Float(2.0), service("Cloud Storage")],
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_fetch_nonzero_lower_bound_is_inclusive() {
    let executor = InMemoryExecutor::new(billing_rows());
    let query = BillingQuery::new(&executor, TABLE);
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let rows = query
        .fetch_nonzero(Columns::All, "usage_end_time", from, 100_000)
        .await
        .unwrap();

    let costs: Vec<f64> = rows.rows().iter().map(|r| r[1].as_f64().unwrap()).collect();
    // cutoff row first (ascending), zero/negative and pre-cutoff rows dropped
    assert_eq!(costs, vec![0.01, 2.0, 1.5]);
    for row in rows.rows() {
        assert!(row[0].as_timestamp().unwrap() >= from);
        assert!(row[1].as_f64().unwrap() > 0.0);
    }
}

#[tokio::test]
async fn test_fetch_all_orders_by_export_time() {
    let ts = |d| Value::from(Utc.with_ymd_and_hms(2024, 2, d, 0, 0, 0).unwrap());
    let rows = RowSet::from_rows(
        vec!["export_time".into(), "cost".into()],
        vec![
            vec![ts(9), Value::Float(0.0)],
            vec![ts(4), Value::Float(1.0)],
        ],
    )
    .unwrap();
    let executor = InMemoryExecutor::new(rows);
    let query = BillingQuery::new(&executor, TABLE);

    let result = query.fetch_all().await.unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.rows()[0][1], Value::Float(1.0));
    assert_eq!(executor.executed()[0].limit, None);
}

#[tokio::test]
async fn test_fetch_top_rejects_zero_limit() {
    let executor = InMemoryExecutor::new(billing_rows());
    let query = BillingQuery::new(&executor, TABLE);
    let err = query
        .fetch_top(Columns::All, "usage_end_time", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidQuery { .. }));
    assert!(executor.executed().is_empty());
}

fn mock_config(server: &MockServer) -> BigQueryConfig {
    BigQueryConfig {
        project_id: "acme-prod".into(),
        billing_table_name: TABLE.into(),
        api_base_url: server.uri(),
        ..Default::default()
    }
}

fn schema() -> serde_json::Value {
    json!({
        "fields": [
            {"name": "usage_end_time", "type": "TIMESTAMP", "mode": "NULLABLE"},
            {"name": "cost", "type": "FLOAT", "mode": "NULLABLE"},
            {"name": "project", "type": "RECORD", "mode": "NULLABLE", "fields": [
                {"name": "id", "type": "STRING", "mode": "NULLABLE"}
            ]}
        ]
    })
}

#[tokio::test]
async fn test_bigquery_executor_single_page() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/bigquery/v2/projects/acme-prod/queries"))
        .and(matchers::header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "bigquery#queryResponse",
            "schema": schema(),
            "jobReference": {"projectId": "acme-prod", "jobId": "job_1", "location": "EU"},
            "totalRows": "1",
            "rows": [
                {"f": [{"v": "1.7040672E9"}, {"v": "0.42"}, {"v": {"f": [{"v": "acme-prod"}]}}]}
            ],
            "jobComplete": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let executor = BigQueryExecutor::with_access_token(&mock_config(&server), "test-token").unwrap();
    let query = BillingQuery::new(&executor, TABLE);
    let rows = query.fetch_all().await.unwrap();

    assert_eq!(rows.columns(), ["usage_end_time", "cost", "project"]);
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows.rows()[0][0],
        Value::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(rows.rows()[0][1], Value::Float(0.42));
    assert_eq!(rows.rows()[0][2], record([("id", "acme-prod")]));
}

#[tokio::test]
async fn test_bigquery_executor_follows_pages() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/bigquery/v2/projects/acme-prod/queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": "acme-prod", "jobId": "job_2"},
            "jobComplete": false
        })))
        .mount(&server)
        .await;

    Mock::given(matchers::method("GET"))
        .and(matchers::path("/bigquery/v2/projects/acme-prod/queries/job_2"))
        .and(matchers::query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schema": schema(),
            "jobReference": {"projectId": "acme-prod", "jobId": "job_2"},
            "rows": [{"f": [{"v": "1.7041536E9"}, {"v": "2.0"}, {"v": null}]}],
            "jobComplete": true
        })))
        .mount(&server)
        .await;

    Mock::given(matchers::method("GET"))
        .and(matchers::path("/bigquery/v2/projects/acme-prod/queries/job_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schema": schema(),
            "jobReference": {"projectId": "acme-prod", "jobId": "job_2"},
            "rows": [{"f": [{"v": "1.7040672E9"}, {"v": "1.0"}, {"v": null}]}],
            "pageToken": "page-2",
            "jobComplete": true
        })))
        .mount(&server)
        .await;

    let executor = BigQueryExecutor::with_access_token(&mock_config(&server), "t").unwrap();
    let spec = QuerySpec::all(TABLE).unwrap();
    let rows = billwatch_query::QueryExecutor::execute(&executor, &spec).await.unwrap();

    let costs: Vec<f64> = rows.rows().iter().map(|r| r[1].as_f64().unwrap()).collect();
    assert_eq!(costs, vec![1.0, 2.0]);
    assert_eq!(rows.rows()[1][2], Value::Null);
}

#[tokio::test]
async fn test_bigquery_error_propagates_as_remote_query_error() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "Access Denied: Table acme-prod:billing", "status": "PERMISSION_DENIED"}
        })))
        .mount(&server)
        .await;

    let executor = BigQueryExecutor::with_access_token(&mock_config(&server), "t").unwrap();
    let query = BillingQuery::new(&executor, TABLE);
    let err = query.fetch_all().await.unwrap_err();

    match err {
        BillingError::RemoteQuery { message, .. } => {
            assert_eq!(message, "403 Access Denied: Table acme-prod:billing");
        }
        other => panic!("expected RemoteQuery, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bigquery_job_errors_are_surfaced() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "errors": [{"reason": "invalidQuery", "message": "Unrecognized name: costs"}]
        })))
        .mount(&server)
        .await;

    let executor = BigQueryExecutor::with_access_token(&mock_config(&server), "t").unwrap();
    let query = BillingQuery::new(&executor, TABLE);
    let err = query.fetch_all().await.unwrap_err();
    assert!(err.to_string().contains("invalidQuery: Unrecognized name: costs"));
}
