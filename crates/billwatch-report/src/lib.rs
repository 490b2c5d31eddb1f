//! # billwatch-report
//!
//! Turns billing row sets into readable cost reports.
//!
//! This crate provides:
//! - [`Table`] - Indexed column-wise table, with [`to_table`], [`unnest`] and [`reduce_view`]
//! - [`SummaryTable`] - Grouped measures, with [`add_percentage`] and [`render_bar`]
//! - [`cost_by_day`] - Per-day cost breakdown
//! - [`build_report`] - The full pipeline used by `billwatch report`

pub mod daily;
pub mod report;
pub mod summary;
pub mod table;

pub use daily::{DailyCost, cost_by_day, render_daily};
pub use report::{CostReport, GroupBy, REPORT_INDEX, ReportOptions, build_report};
pub use summary::{
    BarScale, COST_SUM, DEFAULT_BAR_WIDTH, SummaryColumn, SummaryTable, SummaryValues,
    USAGE_HOURS_MAX, USAGE_HOURS_SUM, add_percentage, bar_column_name, group_and_summarize,
    render_bar, render_table,
};
pub use table::{CUM_COST_COLUMN, Column, Table, reduce_view, to_table, unnest};
