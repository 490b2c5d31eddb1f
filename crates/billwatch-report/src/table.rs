//! Indexed tables built from query row sets.
//!
//! A [`Table`] stores rows column-wise next to an index: either the values of
//! a named column (typically a timestamp such as `usage_end_time`) or the
//! row positions. Operations return new tables and leave their input alone.

use chrono::{DateTime, Utc};
use tracing::debug;

use billwatch_core::{BillingError, Result};
use billwatch_query::{RowSet, Value};

/// Nested columns flattened by [`reduce_view`], as `(parent, key)` pairs.
pub const UNNEST_COLUMNS: [(&str, &str); 3] = [
    ("project", "id"),
    ("service", "description"),
    ("sku", "description"),
];

/// Name of the running cost total column added by [`reduce_view`].
pub const CUM_COST_COLUMN: &str = "cumCost";

/// One named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// Column-wise table with a row index.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    index_name: Option<String>,
    index: Vec<Value>,
    columns: Vec<Column>,
}

impl Table {
    /// Build a table, checking that every column matches the index length.
    pub fn new(index_name: Option<String>, index: Vec<Value>, columns: Vec<Column>) -> Result<Self> {
        for column in &columns {
            if column.values.len() != index.len() {
                return Err(BillingError::schema(format!(
                    "column {:?} has {} values, index has {}",
                    column.name,
                    column.values.len(),
                    index.len()
                )));
            }
        }
        Ok(Self {
            index_name,
            index,
            columns,
        })
    }

    /// Name of the index column, `None` for a positional index.
    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    pub fn index(&self) -> &[Value] {
        &self.index
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Values of a column, or `SchemaError` if it is absent.
    pub fn require_column(&self, name: &str) -> Result<&[Value]> {
        self.column(name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| BillingError::missing_column(name))
    }

    /// Add a column, replacing any column of the same name in place.
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> Result<()> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(BillingError::schema(format!(
                "column {name:?} has {} values, table has {} rows",
                values.len(),
                self.len()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
        Ok(())
    }

    /// Projection onto `names`, in that order, keeping the index.
    pub fn select(&self, names: &[&str]) -> Result<Table> {
        let columns = names
            .iter()
            .map(|name| {
                self.require_column(name).map(|values| Column {
                    name: (*name).to_string(),
                    values: values.to_vec(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Table::new(self.index_name.clone(), self.index.clone(), columns)
    }

    fn take_rows(&self, positions: &[usize]) -> Table {
        Table {
            index_name: self.index_name.clone(),
            index: positions.iter().map(|&i| self.index[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: positions.iter().map(|&i| c.values[i].clone()).collect(),
                })
                .collect(),
        }
    }

    /// Rows stably sorted ascending by index value.
    pub fn sort_index(&self) -> Table {
        let mut positions: Vec<usize> = (0..self.len()).collect();
        positions.sort_by(|&a, &b| self.index[a].sort_cmp(&self.index[b]));
        self.take_rows(&positions)
    }

    /// Rows whose timestamp index is at or after `from`.
    pub fn rows_from(&self, from: DateTime<Utc>) -> Table {
        let positions: Vec<usize> = self
            .index
            .iter()
            .enumerate()
            .filter(|(_, v)| v.as_timestamp().is_some_and(|ts| ts >= from))
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&positions)
    }

    /// Numeric column, nulls as `NaN`.
    pub fn f64_column(&self, name: &str) -> Result<Vec<f64>> {
        self.require_column(name)?
            .iter()
            .map(|v| match v {
                Value::Null => Ok(f64::NAN),
                other => other.as_f64().ok_or_else(|| {
                    BillingError::schema(format!(
                        "column {name:?} holds {} values, expected numbers",
                        other.type_name()
                    ))
                }),
            })
            .collect()
    }

    /// Timestamp column, nulls as `None`.
    pub fn timestamp_column(&self, name: &str) -> Result<Vec<Option<DateTime<Utc>>>> {
        self.require_column(name)?
            .iter()
            .map(|v| match v {
                Value::Null => Ok(None),
                Value::Timestamp(ts) => Ok(Some(*ts)),
                other => Err(BillingError::schema(format!(
                    "column {name:?} holds {} values, expected timestamps",
                    other.type_name()
                ))),
            })
            .collect()
    }

    /// Sum of a numeric column, skipping nulls. Zero for an empty table.
    pub fn column_sum(&self, name: &str) -> Result<f64> {
        Ok(self
            .f64_column(name)?
            .into_iter()
            .filter(|v| !v.is_nan())
            .sum())
    }
}

/// Materialize a row set as a table indexed by `index_column`.
///
/// With `None` the table keeps a positional index (0, 1, 2, ...).
pub fn to_table(rows: &RowSet, index_column: Option<&str>) -> Result<Table> {
    let index_pos = match index_column {
        Some(name) => Some(rows.column_index(name).ok_or_else(|| {
            BillingError::schema(format!("index column {name:?} not in returned columns"))
        })?),
        None => None,
    };

    let mut columns: Vec<Column> = rows
        .columns()
        .iter()
        .map(|name| Column {
            name: name.clone(),
            values: Vec::with_capacity(rows.len()),
        })
        .collect();
    for row in rows.rows() {
        for (column, value) in columns.iter_mut().zip(row) {
            column.values.push(value.clone());
        }
    }

    let index = match index_pos {
        Some(pos) => columns[pos].values.clone(),
        None => (0..rows.len() as i64).map(Value::Int).collect(),
    };

    debug!(nrows = rows.len(), ncols = columns.len(), index = ?index_column, "tabulated rows");
    Table::new(index_column.map(str::to_string), index, columns)
}

/// Extract `key` from each record of `parent_column`.
///
/// Returns the new column name `"{parent_column}_{key}"` and its values.
/// On a non-empty table the parent column must exist and its first value
/// must be a record holding `key`; later rows missing the key give nulls.
/// An empty table yields an empty column without any checks.
pub fn unnest(table: &Table, parent_column: &str, key: &str) -> Result<(String, Vec<Value>)> {
    let name = format!("{parent_column}_{key}");
    if table.is_empty() {
        return Ok((name, Vec::new()));
    }

    let parent = table.require_column(parent_column)?;
    match parent.first().and_then(Value::as_record) {
        Some(first) if first.contains_key(key) => {}
        Some(first) => {
            return Err(BillingError::schema(format!(
                "key {key:?} not in {parent_column:?} record {:?}",
                first.keys().collect::<Vec<_>>()
            )));
        }
        None => {
            return Err(BillingError::schema(format!(
                "column {parent_column:?} does not hold nested records"
            )));
        }
    }

    let values = parent
        .iter()
        .map(|v| {
            v.as_record()
                .and_then(|r| r.get(key))
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect();
    Ok((name, values))
}

/// Compact view of a billing table.
///
/// Adds `usage_duration`, `usage_secs`, `usage_hours` and the running total
/// `cumCost` (in current row order), flattens `project.id`,
/// `service.description` and `sku.description`, and keeps only the
/// flattened columns plus `usage_hours`, `cost` and `cumCost`.
pub fn reduce_view(table: &Table) -> Result<Table> {
    let mut df = table.clone();

    let starts = df.timestamp_column("usage_start_time")?;
    let ends = df.timestamp_column("usage_end_time")?;
    let durations: Vec<Option<chrono::TimeDelta>> = starts
        .iter()
        .zip(&ends)
        .map(|(start, end)| match (start, end) {
            (Some(s), Some(e)) => Some(*e - *s),
            _ => None,
        })
        .collect();
    let secs: Vec<Option<f64>> = durations
        .iter()
        .map(|d| d.map(|d| d.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0))
        .collect();

    df.insert_column(
        "usage_duration",
        durations
            .iter()
            .map(|d| d.map_or(Value::Null, Value::Duration))
            .collect(),
    )?;
    df.insert_column("usage_secs", secs.iter().map(|s| opt_float(*s)).collect())?;
    df.insert_column(
        "usage_hours",
        secs.iter().map(|s| opt_float(s.map(|s| s / 3600.0))).collect(),
    )?;

    let mut running = 0.0;
    let cum_cost = df
        .f64_column("cost")?
        .into_iter()
        .map(|cost| {
            if cost.is_nan() {
                Value::Null
            } else {
                running += cost;
                Value::Float(running)
            }
        })
        .collect();
    df.insert_column(CUM_COST_COLUMN, cum_cost)?;

    let mut keep = Vec::with_capacity(UNNEST_COLUMNS.len() + 3);
    for (parent, key) in UNNEST_COLUMNS {
        let (name, values) = unnest(&df, parent, key)?;
        df.insert_column(name.clone(), values)?;
        keep.push(name);
    }
    keep.extend(["usage_hours", "cost", CUM_COST_COLUMN].map(String::from));

    let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
    df.select(&keep)
}

fn opt_float(v: Option<f64>) -> Value {
    v.map_or(Value::Null, Value::Float)
}
