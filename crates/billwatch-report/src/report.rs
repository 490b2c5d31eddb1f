//! Cost report assembled from fetched billing rows.

use serde::Serialize;
use tracing::{debug, info};

use billwatch_core::Result;
use billwatch_query::RowSet;

use crate::daily::{DailyCost, cost_by_day, render_daily};
use crate::summary::{
    BarScale, COST_SUM, DEFAULT_BAR_WIDTH, SummaryTable, add_percentage, group_and_summarize,
    render_bar, render_table,
};
use crate::table::{reduce_view, to_table};

/// Index column of report tables.
pub const REPORT_INDEX: &str = "usage_end_time";

/// Flattened column a report groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Sku,
    Service,
    Project,
}

impl GroupBy {
    pub fn column(self) -> &'static str {
        match self {
            GroupBy::Sku => "sku_description",
            GroupBy::Service => "service_description",
            GroupBy::Project => "project_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOptions {
    pub group_by: GroupBy,
    pub bar_width: usize,
    pub bar_scale: BarScale,
    pub daily: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            group_by: GroupBy::default(),
            bar_width: DEFAULT_BAR_WIDTH,
            bar_scale: BarScale::default(),
            daily: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostReport {
    pub nrows: usize,
    pub total_cost: f64,
    pub summary: SummaryTable,
    pub daily: Option<Vec<DailyCost>>,
}

impl CostReport {
    pub fn render(&self) -> String {
        let mut out = format!(
            "rows: {}\ntotal cost: {:.2}$\n\n{}",
            self.nrows,
            self.total_cost,
            render_table(&self.summary)
        );
        if let Some(days) = &self.daily {
            out.push_str("\n\n");
            out.push_str(&render_daily(days));
        }
        out
    }
}

/// Build a report from rows fetched with [`REPORT_INDEX`] among their columns.
///
/// The rows are indexed and sorted by [`REPORT_INDEX`], reduced, grouped by
/// `options.group_by`, and given a cost share and bar column.
pub fn build_report(rows: &RowSet, options: &ReportOptions) -> Result<CostReport> {
    let table = to_table(rows, Some(REPORT_INDEX))?;
    let total_cost = table.column_sum("cost")?;
    info!(nrows = table.len(), total_cost, "building cost report");

    let view = reduce_view(&table)?.sort_index();
    let daily = if options.daily {
        Some(cost_by_day(&view)?)
    } else {
        None
    };

    let summary = group_and_summarize(&view, options.group_by.column())?;
    let summary = add_percentage(&summary, COST_SUM)?;
    let summary = render_bar(
        &summary,
        &format!("{COST_SUM}_pct"),
        options.bar_width,
        options.bar_scale,
    )?;
    debug!(ngroups = summary.len(), "report summary ready");

    Ok(CostReport {
        nrows: table.len(),
        total_cost,
        summary,
        daily,
    })
}
