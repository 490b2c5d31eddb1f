//! # billwatch-core
//!
//! Core errors, logging, and configuration shared by the billwatch crates.
//!
//! This crate provides:
//! - [`BillingError`] - Error taxonomy for query, tabulation, report and alert paths
//! - [`logging`] - Tracing setup
//! - [`config`] - YAML configuration loading
//!
//! ## Example
//!
//! ```no_run
//! use billwatch_core::{BillwatchConfig, logging};
//!
//! fn main() -> billwatch_core::Result<()> {
//!     let _guard = logging::init_logging(None, "info", false)?;
//!     let config = BillwatchConfig::load_from(None)?;
//!     tracing::info!(table = %config.bigquery.billing_table_name, "configured");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use config::{BigQueryConfig, BillwatchConfig, SlackConfig};
pub use error::{BillingError, Result};
pub use logging::{LogGuard, init_logging};
