// 🔎 Filter Engine - User-selected predicates over loaded tables
//
// One rule: a row passes only if it satisfies ALL active predicates
// (country membership AND year range AND optional region/entity equality).
// Predicates are pure and commutative, so evaluation order never matters.
//
// Edge policy:
// - empty country selection → empty result, not "all rows"
// - year bounds are inclusive on both ends
// - a row whose date is Missing cannot prove membership in the range,
//   so it fails an active date predicate
// - a range outside the dataset's coverage yields an empty dataset,
//   never an error

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::countries::CountryCode;
use crate::table::{TabularDataset, Value};

// ============================================================================
// DATE RANGE
// ============================================================================

/// Inclusive year range. Construction rejects start > end, so every
/// DateRange in flight is well-formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start_year: i32,
    end_year: i32,
}

impl DateRange {
    pub fn new(start_year: i32, end_year: i32) -> Result<Self> {
        if start_year > end_year {
            return Err(anyhow!(
                "invalid year range: {} > {}",
                start_year,
                end_year
            ));
        }
        Ok(DateRange {
            start_year,
            end_year,
        })
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    /// Inclusive on both bounds.
    pub fn contains_year(&self, year: i32) -> bool {
        year >= self.start_year && year <= self.end_year
    }
}

// ============================================================================
// FILTER SPEC
// ============================================================================

/// The active predicates for one request. Created per request, never
/// persisted. An empty country selection is a valid state - it just
/// selects nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub countries: Vec<CountryCode>,
    pub years: DateRange,
    /// Optional categorical equality (sellers table)
    pub region: Option<String>,
    /// Optional entity equality (seller name)
    pub entity: Option<String>,
}

impl FilterSpec {
    pub fn new(countries: Vec<CountryCode>, years: DateRange) -> Self {
        FilterSpec {
            countries,
            years,
            region: None,
            entity: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

/// Which dataset columns the predicates bind to. A predicate with no
/// bound column is inactive for that dataset (the sellers table has no
/// country column; the case series has no region).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnBinding {
    pub country: Option<String>,
    pub date: Option<String>,
    pub region: Option<String>,
    pub entity: Option<String>,
}

impl ColumnBinding {
    pub fn keyed(country: &str, date: &str) -> Self {
        ColumnBinding {
            country: Some(country.to_string()),
            date: Some(date.to_string()),
            region: None,
            entity: None,
        }
    }

    pub fn categorical(region: &str, entity: &str) -> Self {
        ColumnBinding {
            country: None,
            date: None,
            region: Some(region.to_string()),
            entity: Some(entity.to_string()),
        }
    }
}

// ============================================================================
// FILTER ENGINE
// ============================================================================

pub struct FilterEngine;

impl FilterEngine {
    /// Apply the spec's active predicates to a dataset, producing a new
    /// (possibly empty) dataset. The input is untouched.
    ///
    /// A binding that names a column the dataset does not have is a
    /// misconfiguration, not an inactive predicate: it errors instead of
    /// quietly returning over-included rows. Unbound (None) predicates
    /// stay inactive.
    pub fn apply(
        dataset: &TabularDataset,
        spec: &FilterSpec,
        binding: &ColumnBinding,
    ) -> Result<TabularDataset> {
        let bound = |name: Option<&str>| -> Result<Option<usize>> {
            match name {
                None => Ok(None),
                Some(column) => dataset
                    .column_index(column)
                    .map(Some)
                    .ok_or_else(|| anyhow!("no such filter column: {}", column)),
            }
        };

        let selected: HashSet<&str> = spec.countries.iter().map(|c| c.as_str()).collect();

        let country_col = bound(binding.country.as_deref())?;
        let date_col = bound(binding.date.as_deref())?;
        let region_col = bound(binding.region.as_deref())?;
        let entity_col = bound(binding.entity.as_deref())?;

        Ok(dataset.retain_rows(|row| {
            if let Some(col) = country_col {
                // empty selection: nothing is a member
                match row[col].as_text() {
                    Some(code) if selected.contains(code) => {}
                    _ => return false,
                }
            }

            if let Some(col) = date_col {
                match row[col].year() {
                    Some(year) if spec.years.contains_year(year) => {}
                    _ => return false, // Missing date cannot prove membership
                }
            }

            if let Some(col) = region_col {
                if let Some(wanted) = spec.region.as_deref() {
                    match row[col].as_text() {
                        Some(region) if region == wanted => {}
                        _ => return false,
                    }
                }
            }

            if let Some(col) = entity_col {
                if let Some(wanted) = spec.entity.as_deref() {
                    match row[col].as_text() {
                        Some(entity) if entity == wanted => {}
                        _ => return false,
                    }
                }
            }

            true
        }))
    }
}

// ============================================================================
// TESTS
// ============================================================================
