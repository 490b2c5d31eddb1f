//! Cost per calendar day (UTC) of a timestamp-indexed table.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use billwatch_core::{BillingError, Result};
use billwatch_query::Value;

use crate::table::Table;

/// Summed cost of the rows indexed on one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub cost: f64,
    pub rows: usize,
}

/// Group rows by the UTC date of their timestamp index, oldest day first.
///
/// Rows with a null index are skipped. A non-timestamp index is a
/// `SchemaError`.
pub fn cost_by_day(table: &Table) -> Result<Vec<DailyCost>> {
    let costs = table.f64_column("cost")?;
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();

    for (index, cost) in table.index().iter().zip(costs) {
        let ts = match index {
            Value::Null => continue,
            Value::Timestamp(ts) => ts,
            other => {
                return Err(BillingError::schema(format!(
                    "daily costs need a timestamp index, found {} values",
                    other.type_name()
                )));
            }
        };
        let entry = days.entry(ts.date_naive()).or_default();
        if !cost.is_nan() {
            entry.0 += cost;
        }
        entry.1 += 1;
    }

    Ok(days
        .into_iter()
        .map(|(date, (cost, rows))| DailyCost { date, cost, rows })
        .collect())
}

/// One `YYYY-MM-DD  cost` line per day.
pub fn render_daily(days: &[DailyCost]) -> String {
    let width = days
        .iter()
        .map(|d| format!("{:.5}", d.cost).len())
        .max()
        .unwrap_or(0)
        .max("cost".len());

    let mut lines = vec![format!("{:<10}  {:<width$}", "date", "cost")
        .trim_end()
        .to_string()];
    lines.extend(
        days.iter()
            .map(|d| format!("{}  {:>width$.5}", d.date.format("%Y-%m-%d"), d.cost)),
    );
    lines.join("\n")
}
