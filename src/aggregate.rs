// ∑ Aggregator - Grouped reduction over filtered tables
//
// Groups rows by an ordered key column sequence and reduces numeric
// columns with sum or mean. Two rules with teeth:
//
// 1. Grouping is STABLE: output order is first-seen-key order of the
//    input. Chronological ordering is a separate post-step, never fused
//    into grouping.
// 2. Missing is not zero. Sum skips missing cells; mean excludes them
//    from numerator AND denominator. A group where every cell of a
//    reduced column is missing yields NoData - the consumer can tell
//    "observed zero events" apart from "no observations".

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::table::{TabularDataset, Value};

// ============================================================================
// REDUCERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reducer {
    Sum,
    Mean,
}

impl Reducer {
    pub fn name(&self) -> &str {
        match self {
            Reducer::Sum => "sum",
            Reducer::Mean => "mean",
        }
    }
}

// ============================================================================
// AGGREGATED VALUE
// ============================================================================

/// One reduced number, or the explicit "no observations" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AggregatedValue {
    Value(f64),
    NoData,
}

impl AggregatedValue {
    pub fn is_no_data(&self) -> bool {
        matches!(self, AggregatedValue::NoData)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AggregatedValue::Value(x) => Some(*x),
            AggregatedValue::NoData => None,
        }
    }

    /// NoData exports as null, same convention as Value::Missing.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AggregatedValue::Value(x) => serde_json::json!(x),
            AggregatedValue::NoData => serde_json::Value::Null,
        }
    }
}

// ============================================================================
// AGGREGATED ROWS
// ============================================================================

/// One group: its key values plus one reduced value per reduced column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedRow {
    pub key: Vec<Value>,
    pub values: Vec<AggregatedValue>,
}

/// Output of one aggregation pass. Key/value column names are carried
/// once at the table level, not per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedTable {
    pub key_columns: Vec<String>,
    pub value_columns: Vec<String>,
    pub rows: Vec<AggregatedRow>,
}

impl AggregatedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reduced value for (row, column name).
    pub fn value(&self, row: usize, column: &str) -> Option<AggregatedValue> {
        let col = self.value_columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|r| r.values[col])
    }

    /// Key cell for (row, key column name).
    pub fn key(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.key_columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.key.get(col))
    }

    /// Chronological ordering as an explicit post-step. Stable sort on
    /// one date-typed key column; rows without a date sort last.
    pub fn sort_chronological(&mut self, date_column: &str) -> Result<()> {
        let col = self
            .key_columns
            .iter()
            .position(|c| c == date_column)
            .ok_or_else(|| anyhow!("no such key column: {}", date_column))?;

        self.rows.sort_by_key(|row| match row.key[col].as_date() {
            Some(d) => (0, d),
            None => (1, chrono::NaiveDate::MAX),
        });
        Ok(())
    }

    pub fn to_json_records(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = serde_json::Map::new();
                for (name, value) in self.key_columns.iter().zip(row.key.iter()) {
                    record.insert(name.clone(), value.to_json());
                }
                for (name, value) in self.value_columns.iter().zip(row.values.iter()) {
                    record.insert(name.clone(), value.to_json());
                }
                serde_json::Value::Object(record)
            })
            .collect()
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Per-column accumulator. Only cells with a numeric view contribute;
/// count stays 0 when nothing contributed.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, cell: &Value) {
        if let Some(x) = cell.as_f64() {
            self.sum += x;
            self.count += 1;
        }
    }

    fn finish(&self, reducer: Reducer) -> AggregatedValue {
        if self.count == 0 {
            return AggregatedValue::NoData;
        }
        match reducer {
            Reducer::Sum => AggregatedValue::Value(self.sum),
            Reducer::Mean => AggregatedValue::Value(self.sum / self.count as f64),
        }
    }
}

pub struct Aggregator;

impl Aggregator {
    /// Group `dataset` by `group_keys` (ordered) and reduce each named
    /// column. Output rows follow first-seen-key order.
    pub fn aggregate(
        dataset: &TabularDataset,
        group_keys: &[&str],
        reducers: &[(&str, Reducer)],
    ) -> Result<AggregatedTable> {
        let key_cols: Vec<usize> = group_keys
            .iter()
            .map(|k| {
                dataset
                    .column_index(k)
                    .ok_or_else(|| anyhow!("no such group column: {}", k))
            })
            .collect::<Result<_>>()?;

        let value_cols: Vec<(usize, Reducer)> = reducers
            .iter()
            .map(|(c, r)| {
                dataset
                    .column_index(c)
                    .map(|idx| (idx, *r))
                    .ok_or_else(|| anyhow!("no such value column: {}", c))
            })
            .collect::<Result<_>>()?;

        // first-seen key order, groups keyed by a typed token string
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut keys: Vec<Vec<Value>> = Vec::new();
        let mut accumulators: Vec<Vec<Accumulator>> = Vec::new();

        for row in dataset.rows() {
            let token = key_cols
                .iter()
                .map(|&c| row[c].key_token())
                .collect::<Vec<_>>()
                .join("|");

            let group = *seen.entry(token).or_insert_with(|| {
                keys.push(key_cols.iter().map(|&c| row[c].clone()).collect());
                accumulators.push(vec![Accumulator::default(); value_cols.len()]);
                keys.len() - 1
            });

            for (slot, (col, _)) in value_cols.iter().enumerate() {
                accumulators[group][slot].add(&row[*col]);
            }
        }

        let rows = keys
            .into_iter()
            .zip(accumulators)
            .map(|(key, accs)| AggregatedRow {
                key,
                values: accs
                    .iter()
                    .zip(value_cols.iter())
                    .map(|(acc, (_, reducer))| acc.finish(*reducer))
                    .collect(),
            })
            .collect();

        Ok(AggregatedTable {
            key_columns: group_keys.iter().map(|s| s.to_string()).collect(),
            value_columns: reducers.iter().map(|(c, _)| c.to_string()).collect(),
            rows,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
