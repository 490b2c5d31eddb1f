//! Query executor trait.

use async_trait::async_trait;

use billwatch_core::Result;

use crate::models::RowSet;
use crate::query::QuerySpec;

/// Something that runs a [`QuerySpec`] and returns its rows.
///
/// Implementations:
/// - [`BigQueryExecutor`](crate::bigquery::BigQueryExecutor) - BigQuery REST API
/// - [`InMemoryExecutor`](crate::memory::InMemoryExecutor) - evaluates queries over a fixed row set
///
/// Executors do not retry. Failures are returned as
/// [`BillingError::RemoteQuery`](billwatch_core::BillingError::RemoteQuery).
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run one query to completion and return every row.
    async fn execute(&self, spec: &QuerySpec) -> Result<RowSet>;

    /// Executor name for logging.
    fn name(&self) -> &str;
}
