//! Cost-delta monitoring loop.
//!
//! Every poll the monitor fetches the non-zero cost rows of the trailing
//! window, sums them, and compares the sum against the previous poll. A rise
//! of at least `usd_threshold` sends one alert. The first poll only records
//! a baseline.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use billwatch_core::Result;
use billwatch_query::{BillingQuery, Columns, DEFAULT_LIMIT, QueryExecutor};
use billwatch_report::{REPORT_INDEX, to_table};

use crate::notifier::Notifier;

pub const DEFAULT_POLL_SECS: u64 = 3600;
pub const DEFAULT_USD_THRESHOLD: f64 = 1.0;
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// What the loop does when an iteration fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop and return the error.
    #[default]
    Halt,
    /// Log the error and poll again after the interval.
    Continue,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Fully qualified billing export table.
    pub table: String,
    pub poll_interval: Duration,
    pub usd_threshold: f64,
    /// Trailing window summed on every poll.
    pub window: TimeDelta,
    pub channel: String,
    pub error_policy: ErrorPolicy,
    /// Stop after this many polls, successful or not.
    pub max_iterations: Option<u64>,
}

impl MonitorConfig {
    pub fn new(table: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            usd_threshold: DEFAULT_USD_THRESHOLD,
            window: TimeDelta::days(DEFAULT_WINDOW_DAYS),
            channel: channel.into(),
            error_policy: ErrorPolicy::default(),
            max_iterations: None,
        }
    }
}

/// State carried between polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MonitorState {
    pub last_cost: f64,
    pub iteration_count: u64,
}

/// Outcome of one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    /// 1-based number of this poll.
    pub iteration: u64,
    pub past_month_cost: f64,
    pub past_day_cost: f64,
    pub delta_cost: f64,
    pub notified: bool,
}

/// Polls a billing table and alerts on cost increases.
pub struct BillingMonitor<'a> {
    executor: &'a dyn QueryExecutor,
    notifier: &'a dyn Notifier,
    config: MonitorConfig,
    state: MonitorState,
}

impl<'a> BillingMonitor<'a> {
    pub fn new(
        executor: &'a dyn QueryExecutor,
        notifier: &'a dyn Notifier,
        config: MonitorConfig,
    ) -> Self {
        Self {
            executor,
            notifier,
            config,
            state: MonitorState::default(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Alert text for a cost rise.
    pub fn alert_message(&self, delta_cost: f64) -> String {
        format!(
            "over past {} secs: \ndelta_cost={:.2}$ exceeds usd_threshold={:.2}$",
            self.config.poll_interval.as_secs(),
            delta_cost,
            self.config.usd_threshold
        )
    }

    /// Run one poll as of `now`. State only advances on success.
    pub async fn run_iteration(&mut self, now: DateTime<Utc>) -> Result<IterationReport> {
        let month_ago = now - self.config.window;
        let day_ago = now - TimeDelta::days(1);

        let query = BillingQuery::new(self.executor, &self.config.table);
        let rows = query
            .fetch_nonzero(Columns::All, REPORT_INDEX, month_ago, DEFAULT_LIMIT)
            .await?;

        let (past_month_cost, past_day_cost) = if rows.is_empty() {
            (0.0, 0.0)
        } else {
            let table = to_table(&rows, Some(REPORT_INDEX))?;
            let past_month_cost = table.column_sum("cost")?;
            let past_day_cost = table.rows_from(day_ago).column_sum("cost")?;
            (past_month_cost, past_day_cost)
        };
        info!(
            nrows = rows.len(),
            past_month_cost, past_day_cost, "polled billing costs"
        );

        let delta_cost = if self.state.iteration_count == 0 {
            0.0
        } else {
            past_month_cost - self.state.last_cost
        };
        debug!(delta_cost, last_cost = self.state.last_cost, "cost delta");

        let notified = delta_cost >= self.config.usd_threshold;
        if notified {
            let message = self.alert_message(delta_cost);
            warn!(
                delta_cost,
                usd_threshold = self.config.usd_threshold,
                notifier = self.notifier.name(),
                "cost delta exceeds threshold"
            );
            self.notifier.notify(&self.config.channel, &message).await?;
        }

        self.state.last_cost = past_month_cost;
        self.state.iteration_count += 1;

        Ok(IterationReport {
            iteration: self.state.iteration_count,
            past_month_cost,
            past_day_cost,
            delta_cost,
            notified,
        })
    }

    /// Poll until cancelled, until `max_iterations` polls ran, or until an
    /// iteration fails under [`ErrorPolicy::Halt`].
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<MonitorState> {
        info!(
            table = %self.config.table,
            poll_secs = self.config.poll_interval.as_secs(),
            usd_threshold = self.config.usd_threshold,
            executor = self.executor.name(),
            "monitor started"
        );

        let mut attempts: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                info!("monitor cancelled");
                break;
            }

            attempts += 1;
            match self.run_iteration(Utc::now()).await {
                Ok(report) => debug!(iteration = report.iteration, "iteration complete"),
                Err(e) => match self.config.error_policy {
                    ErrorPolicy::Halt => {
                        error!(error = %e, "monitor iteration failed, stopping");
                        return Err(e);
                    }
                    ErrorPolicy::Continue => {
                        error!(error = %e, "monitor iteration failed");
                    }
                },
            }

            if self.config.max_iterations.is_some_and(|max| attempts >= max) {
                info!(attempts, "reached max iterations");
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("monitor cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        Ok(self.state)
    }
}
