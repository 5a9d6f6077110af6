// 📋 Tabular Model - Uniform in-memory representation of every source
// All four WHO exports (and the sellers sheet) land in the same shape:
// an ordered column list plus rows of typed scalars. Downstream stages
// (filter, aggregate, merge) only ever see this shape.
//
// Datasets are immutable after construction: every pipeline stage builds
// a new dataset instead of mutating in place.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use anyhow::{anyhow, Result};

// ============================================================================
// SCALAR VALUE
// ============================================================================

/// A single typed cell. `Missing` is an explicit sentinel: a cell that could
/// not be parsed (bad date, blank number) stays observable as "no value",
/// which is NOT the same thing as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Numeric view of the cell. Text and dates are not numbers; a caller
    /// that wants to reduce a column uses this and skips `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Year of a date cell, if this cell is a date.
    pub fn year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.as_date().map(|d| d.year())
    }

    /// Language-neutral JSON form for the presentation layer.
    /// Missing maps to null so consumers can tell "no data" from 0.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::json!(n),
            Value::Float(x) => serde_json::json!(x),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Missing => serde_json::Value::Null,
        }
    }

    /// Stable token for use in group-key maps. Discriminant prefix keeps
    /// Text("2021-01-01") and Date(2021-01-01) from colliding.
    pub fn key_token(&self) -> String {
        match self {
            Value::Text(s) => format!("t:{}", s),
            Value::Int(n) => format!("i:{}", n),
            Value::Float(x) => format!("f:{}", x),
            Value::Date(d) => format!("d:{}", d),
            Value::Missing => "∅".to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Missing => write!(f, "(missing)"),
        }
    }
}

// ============================================================================
// TABULAR DATASET
// ============================================================================

/// Ordered rows over a fixed column schema.
///
/// Invariant: every row has exactly `columns.len()` values. `push_row`
/// enforces this at construction time so no downstream stage needs to
/// re-check row arity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularDataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TabularDataset {
    pub fn new(columns: Vec<String>) -> Self {
        TabularDataset {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Append one row. Fails if the row does not match the schema arity.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(anyhow!(
                "row has {} values but schema has {} columns",
                row.len(),
                self.columns.len()
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Cell lookup by row index + column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// New dataset containing only the rows the predicate keeps.
    /// Source dataset is untouched.
    pub fn retain_rows<F>(&self, mut keep: F) -> TabularDataset
    where
        F: FnMut(&[Value]) -> bool,
    {
        TabularDataset {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| keep(r.as_slice()))
                .cloned()
                .collect(),
        }
    }

    /// New dataset with one column's cells rewritten. Used to swap a
    /// free-text country column for its canonical codes.
    pub fn map_column<F>(&self, column: &str, mut f: F) -> Result<TabularDataset>
    where
        F: FnMut(&Value) -> Value,
    {
        let col = self
            .column_index(column)
            .ok_or_else(|| anyhow!("no such column: {}", column))?;

        let rows = self
            .rows
            .iter()
            .map(|r| {
                let mut row = r.clone();
                row[col] = f(&r[col]);
                row
            })
            .collect();

        Ok(TabularDataset {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        match self.column_index(column) {
            Some(col) => self.rows.iter().map(|r| &r[col]).collect(),
            None => Vec::new(),
        }
    }

    /// Export rows as column-name → scalar records (the shape the
    /// presentation layer consumes).
    pub fn to_json_records(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = serde_json::Map::new();
                for (name, value) in self.columns.iter().zip(row.iter()) {
                    record.insert(name.clone(), value.to_json());
                }
                serde_json::Value::Object(record)
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
