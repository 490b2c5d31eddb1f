//! # billwatch-query
//!
//! Queries against a cloud billing export table.
//!
//! This crate provides:
//! - [`QuerySpec`] - Structured query, rendered to Standard SQL
//! - [`BillingQuery`] - `fetch_all`, `fetch_top` and `fetch_nonzero`
//! - [`QueryExecutor`] - Executor trait, with [`BigQueryExecutor`] and [`InMemoryExecutor`]
//! - [`RowSet`] / [`Value`] - Typed rows returned by an executor
//!
//! ## Example
//!
//! ```no_run
//! use billwatch_query::{BillingQuery, Columns, InMemoryExecutor, RowSet};
//! use chrono::{Duration, Utc};
//!
//! # async fn example() -> billwatch_core::Result<()> {
//! let executor = InMemoryExecutor::new(RowSet::default());
//! let query = BillingQuery::new(&executor, "acme-prod.billing.gcp_billing_export_v1_01");
//! let since = Utc::now() - Duration::days(30);
//! let rows = query
//!     .fetch_nonzero(Columns::All, "usage_end_time", since, 100_000)
//!     .await?;
//! println!("{} rows", rows.len());
//! # Ok(())
//! # }
//! ```

pub mod bigquery;
pub mod executor;
pub mod memory;
pub mod models;
pub mod query;

// Re-export main types
pub use bigquery::BigQueryExecutor;
pub use executor::QueryExecutor;
pub use memory::InMemoryExecutor;
pub use models::{RowSet, Value, record};
pub use query::{BillingQuery, Columns, DEFAULT_LIMIT, DEFAULT_ORDER_BY, NonZeroFilter, QuerySpec};
