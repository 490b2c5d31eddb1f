//! Grouped cost summaries.
//!
//! ```text
//! sku_description          usage_hours_sum  usage_hours_max  cost_sum  cost_sum_pct  cost_pct
//! Storage PD Capacity                  720               24   5.00000       0.14286
//! N1 Predefined Instance Core         1440               24  30.00000       0.85714  *********
//! ```
//!
//! Rows are ordered ascending by summed cost so the most expensive group is
//! printed last, closest to the prompt.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use billwatch_core::{BillingError, Result};

use crate::table::Table;

/// Default number of bins of the bar column.
pub const DEFAULT_BAR_WIDTH: usize = 10;

/// Character repeated in the bar column.
pub const BAR_CHAR: char = '*';

pub const USAGE_HOURS_SUM: &str = "usage_hours_sum";
pub const USAGE_HOURS_MAX: &str = "usage_hours_max";
pub const COST_SUM: &str = "cost_sum";

/// How [`render_bar`] places bin edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarScale {
    /// Equal-width bins over the observed min..max of this summary.
    /// Bar lengths are not comparable across summaries.
    #[default]
    Observed,
    /// Equal-width bins over 0..1, comparable across summaries.
    Fixed,
}

/// Values of one summary column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SummaryValues {
    Number(Vec<f64>),
    Text(Vec<String>),
}

/// One named summary column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryColumn {
    pub name: String,
    pub values: SummaryValues,
}

/// One row per group key with aggregated measures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryTable {
    group_column: String,
    keys: Vec<String>,
    columns: Vec<SummaryColumn>,
}

impl SummaryTable {
    /// Column the rows were grouped by.
    pub fn group_column(&self) -> &str {
        &self.group_column
    }

    /// Group keys in row order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn columns(&self) -> &[SummaryColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Numeric column values, or `SchemaError`.
    pub fn number_column(&self, name: &str) -> Result<&[f64]> {
        match self.columns.iter().find(|c| c.name == name) {
            Some(SummaryColumn {
                values: SummaryValues::Number(values),
                ..
            }) => Ok(values),
            Some(_) => Err(BillingError::schema(format!(
                "summary column {name:?} is not numeric"
            ))),
            None => Err(BillingError::missing_column(name)),
        }
    }

    /// Text column values, or `SchemaError`.
    pub fn text_column(&self, name: &str) -> Result<&[String]> {
        match self.columns.iter().find(|c| c.name == name) {
            Some(SummaryColumn {
                values: SummaryValues::Text(values),
                ..
            }) => Ok(values),
            Some(_) => Err(BillingError::schema(format!(
                "summary column {name:?} is not text"
            ))),
            None => Err(BillingError::missing_column(name)),
        }
    }

    fn with_column(&self, name: String, values: SummaryValues) -> SummaryTable {
        let mut out = self.clone();
        match out.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => out.columns.push(SummaryColumn { name, values }),
        }
        out
    }
}

#[derive(Default)]
struct GroupAcc {
    usage_hours_sum: f64,
    usage_hours_max: Option<f64>,
    cost_sum: f64,
}

/// Group `table` by `group_column`, summing and maxing `usage_hours` and
/// summing `cost`, ordered ascending by summed cost.
///
/// Rows with a null group key are dropped. Null measures are skipped.
pub fn group_and_summarize(table: &Table, group_column: &str) -> Result<SummaryTable> {
    let keys = table.require_column(group_column)?;
    let hours = table.f64_column("usage_hours")?;
    let costs = table.f64_column("cost")?;

    let mut groups: BTreeMap<String, GroupAcc> = BTreeMap::new();
    for ((key, hours), cost) in keys.iter().zip(hours).zip(costs) {
        if key.is_null() {
            continue;
        }
        let acc = groups.entry(key.to_string()).or_default();
        if !hours.is_nan() {
            acc.usage_hours_sum += hours;
            acc.usage_hours_max = Some(acc.usage_hours_max.map_or(hours, |m| m.max(hours)));
        }
        if !cost.is_nan() {
            acc.cost_sum += cost;
        }
    }

    let mut rows: Vec<(String, GroupAcc)> = groups.into_iter().collect();
    rows.sort_by(|a, b| a.1.cost_sum.total_cmp(&b.1.cost_sum));

    debug!(group_column, ngroups = rows.len(), "summarized groups");

    let mut keys = Vec::with_capacity(rows.len());
    let mut hours_sum = Vec::with_capacity(rows.len());
    let mut hours_max = Vec::with_capacity(rows.len());
    let mut cost_sum = Vec::with_capacity(rows.len());
    for (key, acc) in rows {
        keys.push(key);
        hours_sum.push(acc.usage_hours_sum);
        hours_max.push(acc.usage_hours_max.unwrap_or(f64::NAN));
        cost_sum.push(acc.cost_sum);
    }

    Ok(SummaryTable {
        group_column: group_column.to_string(),
        keys,
        columns: vec![
            SummaryColumn {
                name: USAGE_HOURS_SUM.into(),
                values: SummaryValues::Number(hours_sum),
            },
            SummaryColumn {
                name: USAGE_HOURS_MAX.into(),
                values: SummaryValues::Number(hours_max),
            },
            SummaryColumn {
                name: COST_SUM.into(),
                values: SummaryValues::Number(cost_sum),
            },
        ],
    })
}

/// Add `"{total_column}_pct"`: each value divided by the column's grand total.
///
/// An empty summary is returned unchanged. A zero grand total over a
/// non-empty summary is a `DivideByZero` error.
pub fn add_percentage(summary: &SummaryTable, total_column: &str) -> Result<SummaryTable> {
    let values = summary.number_column(total_column)?;
    if summary.is_empty() {
        return Ok(summary.clone());
    }

    let total: f64 = values.iter().filter(|v| !v.is_nan()).sum();
    if total == 0.0 {
        return Err(BillingError::DivideByZero {
            column: total_column.to_string(),
        });
    }

    let pct = values.iter().map(|v| v / total).collect();
    Ok(summary.with_column(
        format!("{total_column}_pct"),
        SummaryValues::Number(pct),
    ))
}

/// Name of the bar column rendered from `pct_column`.
///
/// `cost_sum_pct` renders into `cost_pct`.
pub fn bar_column_name(pct_column: &str) -> String {
    match pct_column.strip_suffix("_sum_pct") {
        Some(base) => format!("{base}_pct"),
        None => format!("{pct_column}_bar"),
    }
}

/// Add a bar column repeating [`BAR_CHAR`] once per bin index of each row's
/// percentage, for `width` bins (lengths 0 to `width - 1`).
pub fn render_bar(
    summary: &SummaryTable,
    pct_column: &str,
    width: usize,
    scale: BarScale,
) -> Result<SummaryTable> {
    let pct = summary.number_column(pct_column)?;
    let bins = match scale {
        BarScale::Observed => observed_bins(pct, width),
        BarScale::Fixed => fixed_bins(pct, width),
    };
    let bars = bins
        .into_iter()
        .map(|bin| BAR_CHAR.to_string().repeat(bin.unwrap_or(0)))
        .collect();
    Ok(summary.with_column(bar_column_name(pct_column), SummaryValues::Text(bars)))
}

/// Bin index in right-closed interval `(edge[i], edge[i + 1]]` of `width`
/// equal bins starting at `lo`, with `lo` itself in bin 0.
fn bin_index(value: f64, lo: f64, step: f64, width: usize) -> usize {
    let pos = ((value - lo) / step).ceil();
    if pos <= 1.0 {
        0
    } else {
        (pos as usize - 1).min(width - 1)
    }
}

fn observed_bins(values: &[f64], width: usize) -> Vec<Option<usize>> {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if width == 0 || min > max {
        return vec![None; values.len()];
    }

    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                None
            } else if max == min {
                // a single observed value sits in the middle bin
                Some(width.div_ceil(2) - 1)
            } else {
                Some(bin_index(v, min, (max - min) / width as f64, width))
            }
        })
        .collect()
}

fn fixed_bins(values: &[f64], width: usize) -> Vec<Option<usize>> {
    if width == 0 {
        return vec![None; values.len()];
    }
    values
        .iter()
        .map(|&v| {
            v.is_finite()
                .then(|| bin_index(v.clamp(0.0, 1.0), 0.0, 1.0 / width as f64, width))
        })
        .collect()
}

/// Format a summary as a text table.
///
/// Headers are left-justified. Numbers print in fixed-point with five
/// decimals, except `usage*` columns which are truncated to integers.
pub fn render_table(summary: &SummaryTable) -> String {
    struct RenderedColumn {
        header: String,
        cells: Vec<String>,
        right_align: bool,
    }

    let mut rendered = vec![RenderedColumn {
        header: summary.group_column.clone(),
        cells: summary.keys.clone(),
        right_align: false,
    }];
    for column in &summary.columns {
        let (cells, right_align) = match &column.values {
            SummaryValues::Number(values) => {
                let as_int = column.name.starts_with("usage");
                let cells = values
                    .iter()
                    .map(|&v| format_number(v, as_int))
                    .collect();
                (cells, true)
            }
            SummaryValues::Text(values) => (values.clone(), false),
        };
        rendered.push(RenderedColumn {
            header: column.name.clone(),
            cells,
            right_align,
        });
    }

    let widths: Vec<usize> = rendered
        .iter()
        .map(|c| {
            c.cells
                .iter()
                .map(|s| s.chars().count())
                .chain(std::iter::once(c.header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut lines = Vec::with_capacity(summary.len() + 1);
    lines.push(
        rendered
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{:<w$}", c.header))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string(),
    );
    for row in 0..summary.len() {
        let line = rendered
            .iter()
            .zip(&widths)
            .map(|(c, &w)| {
                if c.right_align {
                    format!("{:>w$}", c.cells[row])
                } else {
                    format!("{:<w$}", c.cells[row])
                }
            })
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(line.trim_end().to_string());
    }

    lines.join("\n")
}

fn format_number(v: f64, as_int: bool) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if as_int {
        format!("{}", v.trunc() as i64)
    } else {
        format!("{v:.5}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_with_pct(pct: Vec<f64>) -> SummaryTable {
        SummaryTable {
            group_column: "service_description".into(),
            keys: (0..pct.len()).map(|i| format!("svc-{i}")).collect(),
            columns: vec![SummaryColumn {
                name: "cost_sum_pct".into(),
                values: SummaryValues::Number(pct),
            }],
        }
    }

    fn bar_lengths(summary: &SummaryTable) -> Vec<usize> {
        summary
            .text_column("cost_pct")
            .unwrap()
            .iter()
            .map(|s| s.len())
            .collect()
    }

    #[test]
    fn test_observed_bins_span_min_to_max() {
        let summary = summary_with_pct(vec![0.05, 0.1, 0.35, 0.5]);
        let bars = render_bar(&summary, "cost_sum_pct", 10, BarScale::Observed).unwrap();
        // min lands in bin 0, max in bin 9; (0.1 - 0.05) / 0.045 -> bin 1
        assert_eq!(bar_lengths(&bars), vec![0, 1, 6, 9]);
    }

    #[test]
    fn test_observed_bins_same_bin_same_length() {
        let summary = summary_with_pct(vec![0.0, 0.01, 0.011, 1.0]);
        let bars = render_bar(&summary, "cost_sum_pct", 10, BarScale::Observed).unwrap();
        let lengths = bar_lengths(&bars);
        assert_eq!(lengths[0], lengths[1]);
        assert_eq!(lengths[1], lengths[2]);
        assert_eq!(lengths[3], 9);
    }

    #[test]
    fn test_observed_bins_single_value() {
        let summary = summary_with_pct(vec![1.0]);
        let bars = render_bar(&summary, "cost_sum_pct", 10, BarScale::Observed).unwrap();
        assert_eq!(bar_lengths(&bars), vec![4]);
    }

    #[test]
    fn test_fixed_bins_ignore_observed_range() {
        let summary = summary_with_pct(vec![0.05, 0.1, 0.35, 0.5]);
        let bars = render_bar(&summary, "cost_sum_pct", 10, BarScale::Fixed).unwrap();
        assert_eq!(bar_lengths(&bars), vec![0, 0, 3, 4]);
    }

    #[test]
    fn test_zero_width_renders_empty_bars() {
        let summary = summary_with_pct(vec![0.2, 0.8]);
        let bars = render_bar(&summary, "cost_sum_pct", 0, BarScale::Observed).unwrap();
        assert_eq!(bar_lengths(&bars), vec![0, 0]);
    }

    #[test]
    fn test_render_bar_requires_numeric_column() {
        let summary = summary_with_pct(vec![0.2]);
        assert!(render_bar(&summary, "cost_pct_missing", 10, BarScale::Observed).is_err());
    }

    #[test]
    fn test_bar_column_name() {
        assert_eq!(bar_column_name("cost_sum_pct"), "cost_pct");
        assert_eq!(bar_column_name("usage_hours_sum_pct"), "usage_hours_pct");
        assert_eq!(bar_column_name("share"), "share_bar");
    }

    #[test]
    fn test_add_percentage_zero_total() {
        let summary = SummaryTable {
            group_column: "sku_description".into(),
            keys: vec!["free tier".into()],
            columns: vec![SummaryColumn {
                name: COST_SUM.into(),
                values: SummaryValues::Number(vec![0.0]),
            }],
        };
        let err = add_percentage(&summary, COST_SUM).unwrap_err();
        assert!(matches!(err, BillingError::DivideByZero { ref column } if column == COST_SUM));
    }

    #[test]
    fn test_add_percentage_empty_summary() {
        let summary = SummaryTable {
            group_column: "sku_description".into(),
            keys: vec![],
            columns: vec![SummaryColumn {
                name: COST_SUM.into(),
                values: SummaryValues::Number(vec![]),
            }],
        };
        let out = add_percentage(&summary, COST_SUM).unwrap();
        assert_eq!(out, summary);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1234567.891, false), "1234567.89100");
        assert_eq!(format_number(0.000001, false), "0.00000");
        assert_eq!(format_number(23.9, true), "23");
        assert_eq!(format_number(f64::NAN, true), "NaN");
    }
}
