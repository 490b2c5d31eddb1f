//! # billwatch-monitor
//!
//! Periodic cost polling with threshold alerts.
//!
//! This crate provides:
//! - [`BillingMonitor`] - Poll loop over an injected executor and notifier
//! - [`Notifier`] - Alert sink trait, with [`SlackNotifier`] and [`RecordingNotifier`]
//!
//! ## Example
//!
//! ```no_run
//! use billwatch_monitor::{BillingMonitor, MonitorConfig, RecordingNotifier};
//! use billwatch_query::{InMemoryExecutor, RowSet};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> billwatch_core::Result<()> {
//! let executor = InMemoryExecutor::new(RowSet::default());
//! let notifier = RecordingNotifier::new();
//! let mut config = MonitorConfig::new("acme-prod.billing.gcp_billing_export_v1_01", "#notifications");
//! config.max_iterations = Some(1);
//!
//! let mut monitor = BillingMonitor::new(&executor, &notifier, config);
//! let state = monitor.run(CancellationToken::new()).await?;
//! println!("last cost {:.2}$", state.last_cost);
//! # Ok(())
//! # }
//! ```

pub mod monitor;
pub mod notifier;

pub use monitor::{
    BillingMonitor, DEFAULT_POLL_SECS, DEFAULT_USD_THRESHOLD, DEFAULT_WINDOW_DAYS, ErrorPolicy,
    IterationReport, MonitorConfig, MonitorState,
};
pub use notifier::{Notifier, RecordingNotifier, SlackNotifier};
