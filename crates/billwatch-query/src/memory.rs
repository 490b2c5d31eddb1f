//! In-memory query executor.
//!
//! Evaluates a [`QuerySpec`] against a fixed [`RowSet`] the way the remote
//! service would: filter, stable ascending sort, limit, then projection.
//! Useful for tests and for replaying a saved export offline.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use billwatch_core::{BillingError, Result};

use crate::executor::QueryExecutor;
use crate::models::{RowSet, Value};
use crate::query::{Columns, QuerySpec};

/// Executor over rows held in memory.
pub struct InMemoryExecutor {
    rows: RowSet,
    executed: Mutex<Vec<QuerySpec>>,
}

impl InMemoryExecutor {
    /// Create an executor over `rows`.
    pub fn new(rows: RowSet) -> Self {
        Self {
            rows,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Specs executed so far, oldest first.
    pub fn executed(&self) -> Vec<QuerySpec> {
        self.executed
            .lock()
            .map(|specs| specs.clone())
            .unwrap_or_default()
    }

    /// Evaluate `spec` synchronously.
    pub fn evaluate(&self, spec: &QuerySpec) -> Result<RowSet> {
        let source = &self.rows;
        let order_idx = source.column_index(&spec.order_by).ok_or_else(|| {
            BillingError::remote(format!("Unrecognized name: {}", spec.order_by))
        })?;

        let mut selected: Vec<&Vec<Value>> = source
            .rows()
            .iter()
            .filter(|row| {
                spec.filter
                    .as_ref()
                    .is_none_or(|filter| filter.matches(source, row))
            })
            .collect();
        selected.sort_by(|a, b| a[order_idx].sort_cmp(&b[order_idx]));
        if let Some(limit) = spec.limit {
            selected.truncate(limit as usize);
        }

        let projection: Vec<usize> = match &spec.columns {
            Columns::All => (0..source.columns().len()).collect(),
            Columns::List(names) => names
                .iter()
                .map(|name| {
                    source
                        .column_index(name)
                        .ok_or_else(|| BillingError::remote(format!("Unrecognized name: {name}")))
                })
                .collect::<Result<_>>()?,
        };

        let columns = projection
            .iter()
            .map(|&i| source.columns()[i].clone())
            .collect();
        let rows = selected
            .into_iter()
            .map(|row| projection.iter().map(|&i| row[i].clone()).collect())
            .collect();
        RowSet::from_rows(columns, rows)
    }
}

#[async_trait]
impl QueryExecutor for InMemoryExecutor {
    async fn execute(&self, spec: &QuerySpec) -> Result<RowSet> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(spec.clone());
        }
        let rows = self.evaluate(spec)?;
        debug!(nrows = rows.len(), "evaluated query in memory");
        Ok(rows)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
