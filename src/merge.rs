// 🧩 Alignment Merger - Union of datasets with disjoint coverage windows
//
// The uptake exports split one logical series across two files with
// non-overlapping reporting periods. The merger concatenates same-schema
// sources into one series keyed by (country, date), ordered by key.
//
// Two hard rules:
// - Duplicate (country, date) keys across sources need an explicit
//   policy: LastSourceWins dedupes keeping the latest source's row,
//   RejectConflicts refuses and names the colliding key. Silent
//   concatenation would double-count doses.
// - Coverage gaps stay gaps. A date present in no source is absent from
//   the output - never zero-filled, never interpolated. Downstream has
//   to be able to tell "no data reported" from "a real drop to zero".

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::table::{TabularDataset, Value};

// ============================================================================
// MERGE POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// A key seen in a later source replaces the earlier source's row.
    LastSourceWins,
    /// Any key collision across sources is an error.
    RejectConflicts,
}

/// Which columns carry the series key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBinding {
    pub country: String,
    pub date: String,
}

impl KeyBinding {
    pub fn new(country: &str, date: &str) -> Self {
        KeyBinding {
            country: country.to_string(),
            date: date.to_string(),
        }
    }
}

// ============================================================================
// TIME SERIES
// ============================================================================

/// A merged, key-ordered series. Wraps the merged dataset so consumers
/// can still treat it as a table, plus per-identifier access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    pub key: KeyBinding,
    pub dataset: TabularDataset,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Rows for one country code, in date order.
    pub fn rows_for(&self, code: &str) -> Vec<&[Value]> {
        let col = match self.dataset.column_index(&self.key.country) {
            Some(c) => c,
            None => return Vec::new(),
        };
        self.dataset
            .rows()
            .iter()
            .filter(|row| row[col].as_text() == Some(code))
            .map(|row| row.as_slice())
            .collect()
    }

    /// Distinct years with at least one row for the given country.
    /// Gap inspection: a year inside the coverage span but absent here
    /// had no reported data.
    pub fn years_for(&self, code: &str) -> Vec<i32> {
        let date_col = match self.dataset.column_index(&self.key.date) {
            Some(c) => c,
            None => return Vec::new(),
        };
        let mut years: Vec<i32> = self
            .rows_for(code)
            .iter()
            .filter_map(|row| row[date_col].year())
            .collect();
        years.sort_unstable();
        years.dedup();
        years
    }

    pub fn to_json_records(&self) -> Vec<serde_json::Value> {
        self.dataset.to_json_records()
    }
}

// ============================================================================
// ALIGNMENT MERGER
// ============================================================================

pub struct AlignmentMerger;

impl AlignmentMerger {
    /// Merge same-schema sources into one (country, date)-ordered series.
    /// Source order matters only for conflict resolution: later sources
    /// are "newer".
    pub fn merge(
        sources: &[&TabularDataset],
        key: &KeyBinding,
        policy: MergePolicy,
    ) -> Result<TimeSeries> {
        let first = sources
            .first()
            .ok_or_else(|| anyhow!("nothing to merge: no sources given"))?;

        for source in sources {
            if source.columns() != first.columns() {
                return Err(anyhow!(
                    "cannot merge: column schemas differ ({:?} vs {:?})",
                    first.columns(),
                    source.columns()
                ));
            }
        }

        let country_col = first
            .column_index(&key.country)
            .ok_or_else(|| anyhow!("no such key column: {}", key.country))?;
        let date_col = first
            .column_index(&key.date)
            .ok_or_else(|| anyhow!("no such key column: {}", key.date))?;

        // Union of rows, keyed for collision detection. Rows with a
        // missing key part cannot collide and are appended as-is.
        let mut by_key: HashMap<(String, String), usize> = HashMap::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();

        for source in sources {
            for row in source.rows() {
                let country = row[country_col].clone();
                let date = row[date_col].clone();

                if country.is_missing() || date.is_missing() {
                    rows.push(row.clone());
                    continue;
                }

                let token = (country.key_token(), date.key_token());
                match by_key.get(&token) {
                    None => {
                        by_key.insert(token, rows.len());
                        rows.push(row.clone());
                    }
                    Some(&existing) => match policy {
                        MergePolicy::LastSourceWins => rows[existing] = row.clone(),
                        MergePolicy::RejectConflicts => {
                            return Err(anyhow!(
                                "conflicting rows for ({}, {}) across sources",
                                country,
                                date
                            ));
                        }
                    },
                }
            }
        }

        // key order: country, then date; missing keys sort last
        rows.sort_by(|a, b| {
            let key_of = |row: &Vec<Value>| {
                (
                    row[country_col].is_missing(),
                    row[country_col].as_text().unwrap_or("").to_string(),
                    row[date_col].is_missing(),
                    row[date_col].as_date().unwrap_or(chrono::NaiveDate::MAX),
                )
            };
            key_of(a).cmp(&key_of(b))
        });

        let mut dataset = TabularDataset::new(first.columns().to_vec());
        for row in rows {
            dataset.push_row(row)?;
        }

        Ok(TimeSeries {
            key: key.clone(),
            dataset,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn uptake(rows: &[(&str, (i32, u32, u32), i64)]) -> TabularDataset {
        let mut ds = TabularDataset::new(vec![
            "COUNTRY".to_string(),
            "DATE".to_string(),
            "COVID_VACCINE_ADM_1D".to_string(),
        ]);
        for (country, (y, m, d), doses) in rows {
            ds.push_row(vec![
                Value::Text(country.to_string()),
                Value::Date(NaiveDate::from_ymd_opt(*y, *m, *d).unwrap()),
                Value::Int(*doses),
            ])
            .unwrap();
        }
        ds
    }

    fn key() -> KeyBinding {
        KeyBinding::new("COUNTRY", "DATE")
    }

    #[test]
    fn test_disjoint_coverage_concatenates_with_gap_preserved() {
        // archive covers 2021-2022, current covers 2024; 2023 is a gap
        let archive = uptake(&[
            ("MEX", (2021, 5, 1), 1000),
            ("MEX", (2022, 2, 1), 2000),
        ]);
        let current = uptake(&[("MEX", (2024, 1, 15), 500)]);

        let series =
            AlignmentMerger::merge(&[&archive, &current], &key(), MergePolicy::RejectConflicts)
                .unwrap();

        // row count is the sum - disjoint keys, nothing deduplicated
        assert_eq!(series.len(), archive.len() + current.len());
        // 2023 has no synthesized row
        assert_eq!(series.years_for("MEX"), vec![2021, 2022, 2024]);
    }

    #[test]
    fn test_last_source_wins_dedupes_collision() {
        let archive = uptake(&[("MEX", (2024, 1, 15), 111)]);
        let current = uptake(&[("MEX", (2024, 1, 15), 222)]);

        let series =
            AlignmentMerger::merge(&[&archive, &current], &key(), MergePolicy::LastSourceWins)
                .unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(
            series.dataset.value(0, "COVID_VACCINE_ADM_1D"),
            Some(&Value::Int(222))
        );
    }

    #[test]
    fn test_reject_conflicts_errors_on_collision() {
        let archive = uptake(&[("MEX", (2024, 1, 15), 111)]);
        let current = uptake(&[("MEX", (2024, 1, 15), 222)]);

        let result =
            AlignmentMerger::merge(&[&archive, &current], &key(), MergePolicy::RejectConflicts);

        let err = result.unwrap_err().to_string();
        assert!(err.contains("MEX"));
        assert!(err.contains("2024-01-15"));
    }

    #[test]
    fn test_output_ordered_by_country_then_date() {
        let a = uptake(&[("MEX", (2024, 3, 1), 1), ("BRA", (2024, 1, 1), 2)]);
        let b = uptake(&[("BRA", (2023, 6, 1), 3), ("MEX", (2021, 1, 1), 4)]);

        let series =
            AlignmentMerger::merge(&[&a, &b], &key(), MergePolicy::RejectConflicts).unwrap();

        let keys: Vec<(String, NaiveDate)> = series
            .dataset
            .rows()
            .iter()
            .map(|r| {
                (
                    r[0].as_text().unwrap().to_string(),
                    r[1].as_date().unwrap(),
                )
            })
            .collect();

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_schema_mismatch_is_an_error() {
        let a = uptake(&[("MEX", (2024, 1, 1), 1)]);
        let mut b = TabularDataset::new(vec!["COUNTRY".to_string(), "DATE".to_string()]);
        b.push_row(vec![
            Value::Text("MEX".to_string()),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()),
        ])
        .unwrap();

        assert!(AlignmentMerger::merge(&[&a, &b], &key(), MergePolicy::LastSourceWins).is_err());
    }

    #[test]
    fn test_missing_key_rows_pass_through_without_colliding() {
        let mut a = uptake(&[("MEX", (2024, 1, 1), 1)]);
        a.push_row(vec![Value::Missing, Value::Missing, Value::Int(9)])
            .unwrap();
        let mut b = uptake(&[]);
        b.push_row(vec![Value::Missing, Value::Missing, Value::Int(8)])
            .unwrap();

        let series =
            AlignmentMerger::merge(&[&a, &b], &key(), MergePolicy::RejectConflicts).unwrap();

        // both unresolved rows kept (they cannot claim a key), sorted last
        assert_eq!(series.len(), 3);
        assert!(series.dataset.rows()[1][0].is_missing());
    }
}
