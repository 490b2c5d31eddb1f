//! BigQuery executor using the REST API.
//!
//! Runs queries through `jobs.query` and follows `getQueryResults` until the
//! job is complete and every page is read. Cells are decoded with the
//! response schema into typed [`Value`]s.
//!
//! ## Example
//!
//! ```no_run
//! use billwatch_core::BigQueryConfig;
//! use billwatch_query::{BigQueryExecutor, BillingQuery};
//!
//! # async fn example() -> billwatch_core::Result<()> {
//! let config = BigQueryConfig {
//!     project_id: "acme-prod".into(),
//!     billing_table_name: "acme-prod.billing.gcp_billing_export_v1_01".into(),
//!     ..Default::default()
//! };
//! let executor = BigQueryExecutor::from_config(&config)?;
//! let query = BillingQuery::new(&executor, &config.billing_table_name);
//! let rows = query.fetch_all().await?;
//! println!("{} rows", rows.len());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use billwatch_core::{BigQueryConfig, BillingError, Result};

use crate::executor::QueryExecutor;
use crate::models::{RowSet, Value};
use crate::query::QuerySpec;

/// Server-side wait per call before answering with `jobComplete: false`.
const SERVER_WAIT_MS: u64 = 10_000;

/// BigQuery executor.
pub struct BigQueryExecutor {
    client: reqwest::Client,
    access_token: String,
    project_id: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableFieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

impl BigQueryExecutor {
    /// Create an executor from config, reading the access token from the
    /// environment variable named by `access_token_env`.
    pub fn from_config(config: &BigQueryConfig) -> Result<Self> {
        let access_token = std::env::var(&config.access_token_env).map_err(|_| {
            BillingError::ConfigMissingField {
                field: format!("{} environment variable", config.access_token_env),
            }
        })?;
        Self::with_access_token(config, access_token)
    }

    /// Create an executor with an explicit access token.
    pub fn with_access_token(config: &BigQueryConfig, access_token: impl Into<String>) -> Result<Self> {
        if config.project_id.trim().is_empty() {
            return Err(BillingError::ConfigMissingField {
                field: "bigquery.project_id".into(),
            });
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BillingError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            access_token: access_token.into(),
            project_id: config.project_id.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.base_url, self.project_id
        )
    }

    /// Submit the query through `jobs.query`.
    async fn start_query(&self, sql: &str) -> Result<QueryResponse> {
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: SERVER_WAIT_MS,
        };

        debug!(url = %self.queries_url(), "submitting query job");
        let response = self
            .client
            .post(self.queries_url())
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| BillingError::remote_with_source("query request failed", e))?;

        Self::read_response(response).await
    }

    /// Fetch results (or completion status) of a running job.
    async fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let mut params = vec![("timeoutMs", SERVER_WAIT_MS.to_string())];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }

        debug!(job_id = %job.job_id, page_token, "fetching query results");
        let response = self
            .client
            .get(format!("{}/{}", self.queries_url(), job.job_id))
            .bearer_auth(&self.access_token)
            .query(&params)
            .send()
            .await
            .map_err(|e| BillingError::remote_with_source("getQueryResults request failed", e))?;

        Self::read_response(response).await
    }

    async fn read_response(response: reqwest::Response) -> Result<QueryResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| {
                    let code = envelope.error.code.unwrap_or(status.as_u16());
                    envelope.error.message.map(|m| format!("{code} {m}"))
                })
                .unwrap_or_else(|| format!("{status} - {body}"));
            return Err(BillingError::remote(message));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| BillingError::remote_with_source("malformed query response", e))?;

        if let Some(error) = parsed.errors.first() {
            return Err(BillingError::remote(format!(
                "{}: {}",
                error.reason.as_deref().unwrap_or("error"),
                error.message.as_deref().unwrap_or("query job failed")
            )));
        }

        Ok(parsed)
    }
}

#[async_trait]
impl QueryExecutor for BigQueryExecutor {
    async fn execute(&self, spec: &QuerySpec) -> Result<RowSet> {
        let sql = spec.to_sql();
        let mut response = self.start_query(&sql).await?;

        let mut schema: Option<TableSchema> = None;
        let mut raw_rows: Vec<TableRow> = Vec::new();

        loop {
            if !response.job_complete {
                let job = response
                    .job_reference
                    .clone()
                    .ok_or_else(|| BillingError::remote("incomplete job without jobReference"))?;
                response = self.query_results(&job, None).await?;
                continue;
            }

            if schema.is_none() {
                schema = response.schema.take();
            }
            raw_rows.append(&mut response.rows);

            match response.page_token.take() {
                Some(token) => {
                    let job = response
                        .job_reference
                        .clone()
                        .ok_or_else(|| BillingError::remote("paged result without jobReference"))?;
                    response = self.query_results(&job, Some(&token)).await?;
                }
                None => break,
            }
        }

        let fields = schema.map(|s| s.fields).unwrap_or_default();
        let mut rows = RowSet::new(fields.iter().map(|f| f.name.clone()).collect());
        for raw in raw_rows {
            rows.push(decode_row(&fields, &raw.f)?)?;
        }

        debug!(nrows = rows.len(), "query job finished");
        Ok(rows)
    }

    fn name(&self) -> &str {
        "bigquery"
    }
}

fn decode_row(fields: &[TableFieldSchema], cells: &[TableCell]) -> Result<Vec<Value>> {
    if cells.len() != fields.len() {
        return Err(BillingError::remote(format!(
            "row has {} cells but schema has {} fields",
            cells.len(),
            fields.len()
        )));
    }
    fields
        .iter()
        .zip(cells)
        .map(|(field, cell)| decode_cell(field, &cell.v))
        .collect()
}

fn decode_cell(field: &TableFieldSchema, raw: &serde_json::Value) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    if field.mode.as_deref() == Some("REPEATED") {
        let items = raw
            .as_array()
            .ok_or_else(|| decode_error(field, raw))?
            .iter()
            .map(|item| decode_scalar(field, item.get("v").unwrap_or(&serde_json::Value::Null)))
            .collect::<Result<_>>()?;
        return Ok(Value::List(items));
    }

    decode_scalar(field, raw)
}

fn decode_scalar(field: &TableFieldSchema, raw: &serde_json::Value) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    match field.field_type.as_str() {
        "RECORD" | "STRUCT" => {
            let cells = raw
                .get("f")
                .and_then(|f| f.as_array())
                .ok_or_else(|| decode_error(field, raw))?;
            if cells.len() != field.fields.len() {
                return Err(decode_error(field, raw));
            }
            let mut record = BTreeMap::new();
            for (sub, cell) in field.fields.iter().zip(cells) {
                let value = cell.get("v").unwrap_or(&serde_json::Value::Null);
                record.insert(sub.name.clone(), decode_cell(sub, value)?);
            }
            Ok(Value::Record(record))
        }
        "TIMESTAMP" => {
            let secs = parse_text::<f64>(field, raw)?;
            parse_epoch_seconds(secs)
                .map(Value::Timestamp)
                .ok_or_else(|| decode_error(field, raw))
        }
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => {
            parse_text::<f64>(field, raw).map(Value::Float)
        }
        "INTEGER" | "INT64" => parse_text::<i64>(field, raw).map(Value::Int),
        "BOOLEAN" | "BOOL" => parse_text::<bool>(field, raw).map(Value::Bool),
        _ => match raw {
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            other => Ok(Value::String(other.to_string())),
        },
    }
}

fn parse_text<T: std::str::FromStr>(field: &TableFieldSchema, raw: &serde_json::Value) -> Result<T> {
    raw.as_str()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| decode_error(field, raw))
}

/// Convert BigQuery's float epoch seconds (`"1.7040672E9"`) to a timestamp.
fn parse_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

fn decode_error(field: &TableFieldSchema, raw: &serde_json::Value) -> BillingError {
    BillingError::remote(format!(
        "cannot decode {} value {raw} for field {}",
        field.field_type, field.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn field(name: &str, field_type: &str) -> TableFieldSchema {
        TableFieldSchema {
            name: name.into(),
            field_type: field_type.into(),
            mode: None,
            fields: vec![],
        }
    }

    #[test]
    fn test_parse_epoch_seconds() {
        let ts = parse_epoch_seconds(1.7040672E9).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(parse_epoch_seconds(f64::NAN).is_none());
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            decode_cell(&field("cost", "FLOAT"), &json!("0.25")).unwrap(),
            Value::Float(0.25)
        );
        assert_eq!(
            decode_cell(&field("n", "INTEGER"), &json!("7")).unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            decode_cell(&field("b", "BOOLEAN"), &json!("true")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            decode_cell(&field("currency", "STRING"), &json!("USD")).unwrap(),
            Value::from("USD")
        );
        assert_eq!(
            decode_cell(&field("cost", "FLOAT"), &serde_json::Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_decode_record() {
        let service = TableFieldSchema {
            name: "service".into(),
            field_type: "RECORD".into(),
            mode: Some("NULLABLE".into()),
            fields: vec![field("id", "STRING"), field("description", "STRING")],
        };
        let value = decode_cell(
            &service,
            &json!({"f": [{"v": "6F81-5844-456A"}, {"v": "Compute Engine"}]}),
        )
        .unwrap();
        let record = value.as_record().unwrap();
        assert_eq!(record["description"], Value::from("Compute Engine"));
    }

    #[test]
    fn test_decode_repeated_record() {
        let labels = TableFieldSchema {
            name: "labels".into(),
            field_type: "RECORD".into(),
            mode: Some("REPEATED".into()),
            fields: vec![field("key", "STRING"), field("value", "STRING")],
        };
        let value = decode_cell(
            &labels,
            &json!([{"v": {"f": [{"v": "env"}, {"v": "prod"}]}}]),
        )
        .unwrap();
        match value {
            Value::List(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].as_record().unwrap()["value"], Value::from("prod"));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_bad_number() {
        let err = decode_cell(&field("cost", "FLOAT"), &json!("abc")).unwrap_err();
        assert!(err.is_remote());
    }

    #[test]
    fn test_requires_project_id() {
        let config = BigQueryConfig::default();
        assert!(BigQueryExecutor::with_access_token(&config, "token").is_err());
    }
}
