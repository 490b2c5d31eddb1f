//! Billing table queries.
//!
//! A [`QuerySpec`] is the structured form of one query against the billing
//! export table; [`QuerySpec::to_sql`] renders it as Standard SQL for
//! BigQuery, and [`InMemoryExecutor`](crate::memory::InMemoryExecutor)
//! evaluates it directly. [`BillingQuery`] holds an executor and a table
//! name and exposes the three fetch operations.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use billwatch_core::{BillingError, Result};

use crate::executor::QueryExecutor;
use crate::models::{RowSet, Value};

/// Default sort column of billing queries.
pub const DEFAULT_ORDER_BY: &str = "export_time";

/// Default row limit of billing queries.
pub const DEFAULT_LIMIT: u64 = 100_000;

/// Name of the cost column the nonzero filter applies to.
pub const COST_COLUMN: &str = "cost";

/// Column selection of a query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Columns {
    /// `SELECT *`
    #[default]
    All,
    /// Explicit column list, never empty
    List(Vec<String>),
}

impl Columns {
    /// Build an explicit column list.
    pub fn list<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Columns::List(columns.into_iter().map(Into::into).collect())
    }

    /// Parse a comma separated column specification (`*` selects all).
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec == "*" {
            return Ok(Columns::All);
        }
        let columns = Columns::list(spec.split(',').map(str::trim).filter(|c| !c.is_empty()));
        columns.validate()?;
        Ok(columns)
    }

    fn validate(&self) -> Result<()> {
        if let Columns::List(columns) = self {
            if columns.is_empty() {
                return Err(BillingError::invalid_query("column list is empty"));
            }
            for column in columns {
                validate_identifier(column)?;
            }
        }
        Ok(())
    }

    fn to_sql(&self) -> String {
        match self {
            Columns::All => "*".to_string(),
            Columns::List(columns) => columns.join(", "),
        }
    }
}

/// Lower time bound plus positive-cost filter.
///
/// Matches rows where `column >= from` and `cost > 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonZeroFilter {
    pub column: String,
    pub from: DateTime<Utc>,
}

impl NonZeroFilter {
    /// Evaluate the filter against one row of `rows`.
    ///
    /// Rows missing either column, or holding nulls there, do not match.
    pub fn matches(&self, rows: &RowSet, row: &[Value]) -> bool {
        let Some(ts_idx) = rows.column_index(&self.column) else {
            return false;
        };
        let Some(cost_idx) = rows.column_index(COST_COLUMN) else {
            return false;
        };
        let after = match &row[ts_idx] {
            Value::Timestamp(ts) => *ts >= self.from,
            _ => false,
        };
        let positive = row[cost_idx].as_f64().is_some_and(|cost| cost > 0.0);
        after && positive
    }
}

/// One query against the billing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub table: String,
    pub columns: Columns,
    pub filter: Option<NonZeroFilter>,
    pub order_by: String,
    pub limit: Option<u64>,
}

impl QuerySpec {
    /// Every row, ascending by `export_time`.
    pub fn all(table: impl Into<String>) -> Result<Self> {
        let spec = Self {
            table: table.into(),
            columns: Columns::All,
            filter: None,
            order_by: DEFAULT_ORDER_BY.to_string(),
            limit: None,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Up to `limit` rows ascending by `order_by`.
    pub fn top(
        table: impl Into<String>,
        columns: Columns,
        order_by: impl Into<String>,
        limit: u64,
    ) -> Result<Self> {
        let spec = Self {
            table: table.into(),
            columns,
            filter: None,
            order_by: order_by.into(),
            limit: Some(limit),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Up to `limit` rows with `order_by >= from_date` and positive cost.
    pub fn nonzero(
        table: impl Into<String>,
        columns: Columns,
        order_by: impl Into<String>,
        from_date: DateTime<Utc>,
        limit: u64,
    ) -> Result<Self> {
        let order_by = order_by.into();
        let spec = Self {
            table: table.into(),
            columns,
            filter: Some(NonZeroFilter {
                column: order_by.clone(),
                from: from_date,
            }),
            order_by,
            limit: Some(limit),
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        validate_table_name(&self.table)?;
        self.columns.validate()?;
        validate_identifier(&self.order_by)?;
        if self.limit == Some(0) {
            return Err(BillingError::invalid_query("limit must be a positive integer"));
        }
        Ok(())
    }

    /// Render as BigQuery Standard SQL.
    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "SELECT {}\nFROM `{}`\n",
            self.columns.to_sql(),
            self.table
        );
        if let Some(filter) = &self.filter {
            sql.push_str(&format!(
                "WHERE ({} >= TIMESTAMP('{}')) AND ({COST_COLUMN} > 0)\n",
                filter.column,
                filter.from.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        sql.push_str(&format!("ORDER BY {} ASC", self.order_by));
        if let Some(limit) = self.limit {
            sql.push_str(&format!("\nLIMIT {limit}"));
        }
        sql
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(BillingError::invalid_query(format!(
            "invalid column identifier {name:?}"
        )))
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(BillingError::invalid_query(format!(
            "invalid table name {name:?}"
        )))
    }
}

/// Query interface for the billing export table.
pub struct BillingQuery<'a> {
    executor: &'a dyn QueryExecutor,
    table: String,
}

impl<'a> BillingQuery<'a> {
    /// Create a query interface over `table`.
    pub fn new(executor: &'a dyn QueryExecutor, table: impl Into<String>) -> Self {
        Self {
            executor,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Every row of the billing table, ascending by `export_time`.
    pub async fn fetch_all(&self) -> Result<RowSet> {
        let spec = QuerySpec::all(&self.table)?;
        self.run(&spec).await
    }

    /// Up to `limit` rows of `columns`, ascending by `order_by`.
    pub async fn fetch_top(&self, columns: Columns, order_by: &str, limit: u64) -> Result<RowSet> {
        let spec = QuerySpec::top(&self.table, columns, order_by, limit)?;
        self.run(&spec).await
    }

    /// Up to `limit` nonzero-cost rows with `order_by >= from_date`.
    pub async fn fetch_nonzero(
        &self,
        columns: Columns,
        order_by: &str,
        from_date: DateTime<Utc>,
        limit: u64,
    ) -> Result<RowSet> {
        let spec = QuerySpec::nonzero(&self.table, columns, order_by, from_date, limit)?;
        self.run(&spec).await
    }

    async fn run(&self, spec: &QuerySpec) -> Result<RowSet> {
        debug!(executor = self.executor.name(), sql = %spec.to_sql(), "executing query");
        let rows = self.executor.execute(spec).await?;
        info!(nrows = rows.len(), table = %self.table, "query returned");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TABLE: &str = "acme-prod.billing.gcp_billing_export_v1_01";

    #[test]
    fn test_all_sql() {
        let spec = QuerySpec::all(TABLE).unwrap();
        assert_eq!(
            spec.to_sql(),
            "SELECT *\nFROM `acme-prod.billing.gcp_billing_export_v1_01`\nORDER BY export_time ASC"
        );
    }

    #[test]
    fn test_top_sql() {
        let spec = QuerySpec::top(TABLE, Columns::list(["export_time", "cost"]), "cost", 10).unwrap();
        assert_eq!(
            spec.to_sql(),
            "SELECT export_time, cost\nFROM `acme-prod.billing.gcp_billing_export_v1_01`\nORDER BY cost ASC\nLIMIT 10"
        );
    }

    #[test]
    fn test_nonzero_sql() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let spec = QuerySpec::nonzero(TABLE, Columns::All, "usage_end_time", from, DEFAULT_LIMIT)
            .unwrap();
        let sql = spec.to_sql();
        assert!(sql.contains(
            "WHERE (usage_end_time >= TIMESTAMP('2024-01-01 00:00:00')) AND (cost > 0)"
        ));
        assert!(sql.ends_with("ORDER BY usage_end_time ASC\nLIMIT 100000"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = QuerySpec::top(TABLE, Columns::All, "export_time", 0).unwrap_err();
        assert!(matches!(err, BillingError::InvalidQuery { .. }));
    }

    #[test]
    fn test_empty_columns_rejected() {
        assert!(QuerySpec::top(TABLE, Columns::List(vec![]), "export_time", 5).is_err());
        assert!(Columns::parse(" , ").is_err());
    }

    #[test]
    fn test_injection_rejected() {
        assert!(QuerySpec::top(TABLE, Columns::All, "cost; DROP TABLE x", 5).is_err());
        assert!(QuerySpec::all("billing` WHERE 1=1 --").is_err());
    }

    #[test]
    fn test_columns_parse() {
        assert_eq!(Columns::parse("*").unwrap(), Columns::All);
        assert_eq!(
            Columns::parse("export_time, cost").unwrap(),
            Columns::list(["export_time", "cost"])
        );
    }
}
