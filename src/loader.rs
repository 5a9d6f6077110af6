// 📂 Dataset Loader - Heterogeneous CSV sources → TabularDataset
//
// Five source shapes, one output shape. Each source names its own date,
// country and numeric columns (a ColumnMap), so schema differences stay
// at the edge and the rest of the pipeline sees uniform tables.
//
// Parse policy is lenient per-cell, strict per-file:
// - a date that fails to parse becomes Value::Missing for that row
// - a blank/garbage number becomes Value::Missing
// - rows with missing join keys are retained (exclusion is the filter's
//   job; raw row counts must stay reportable)
// - a file that cannot be opened/read at all is fatal for THAT source
//   only and never aborts sibling loads

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;

use crate::table::{TabularDataset, Value};

// ============================================================================
// SOURCE KINDS
// ============================================================================

/// Which upstream export a file is. The WHO splits vaccine uptake across
/// two non-overlapping reporting periods; both get the same ColumnMap but
/// stay distinct sources until the alignment merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Daily cases/deaths time series (free-text country names)
    CaseSeries,
    /// Vaccine uptake, 2021-2023 reporting period (ISO-3 keyed)
    UptakeArchive,
    /// Vaccine uptake, 2024 reporting period (ISO-3 keyed)
    UptakeCurrent,
    /// Vaccine policy milestone events (ISO-3 keyed)
    PolicyEvents,
    /// Sellers/sales table (no country key, entity + region instead)
    SellerTable,
}

impl SourceKind {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceKind::CaseSeries => "WHO daily case series",
            SourceKind::UptakeArchive => "Vaccine uptake 2021-2023",
            SourceKind::UptakeCurrent => "Vaccine uptake 2024",
            SourceKind::PolicyEvents => "Vaccine policy events",
            SourceKind::SellerTable => "Sellers table",
        }
    }

    /// Short code for internal use
    pub fn code(&self) -> &str {
        match self {
            SourceKind::CaseSeries => "cases",
            SourceKind::UptakeArchive => "uptake2123",
            SourceKind::UptakeCurrent => "uptake24",
            SourceKind::PolicyEvents => "policy24",
            SourceKind::SellerTable => "sellers",
        }
    }

    /// Column roles as the upstream export actually names them.
    pub fn default_columns(&self) -> ColumnMap {
        match self {
            SourceKind::CaseSeries => ColumnMap {
                date: Some("Date_reported".to_string()),
                country: Some("Country".to_string()),
                numeric: vec!["New_cases".to_string(), "New_deaths".to_string()],
            },
            SourceKind::UptakeArchive | SourceKind::UptakeCurrent => ColumnMap {
                date: Some("DATE".to_string()),
                country: Some("COUNTRY".to_string()),
                numeric: vec!["COVID_VACCINE_ADM_1D".to_string()],
            },
            SourceKind::PolicyEvents => ColumnMap {
                date: Some("DATE".to_string()),
                country: Some("COUNTRY".to_string()),
                numeric: vec![],
            },
            SourceKind::SellerTable => ColumnMap {
                date: None,
                country: None,
                numeric: vec![
                    "SOLD UNITS".to_string(),
                    "TOTAL SALES".to_string(),
                    "SALES AVERAGE".to_string(),
                ],
            },
        }
    }
}

// ============================================================================
// COLUMN MAPPING
// ============================================================================

/// Maps pipeline roles onto a source's own column names. Supplied per
/// source; the loader never guesses schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMap {
    /// Column to parse as a date (lenient), if the source has one
    pub date: Option<String>,
    /// Column carrying the country key, if the source has one
    pub country: Option<String>,
    /// Columns to parse as numbers
    pub numeric: Vec<String>,
}

/// One source to load: what it is, where it lives, how its columns map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub kind: SourceKind,
    pub path: PathBuf,
    pub columns: ColumnMap,
}

impl SourceSpec {
    pub fn new(kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        SourceSpec {
            columns: kind.default_columns(),
            kind,
            path: path.into(),
        }
    }
}

// ============================================================================
// LOAD OUTCOME
// ============================================================================

/// A source that failed to load, with enough detail to say which one and
/// why. Isolated from its siblings: one bad file never kills the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFailure {
    pub kind: SourceKind,
    pub path: PathBuf,
    pub reason: String,
}

/// Result of loading a batch of independent sources.
#[derive(Debug)]
pub struct LoadOutcome {
    pub loaded: Vec<(SourceKind, TabularDataset)>,
    pub failures: Vec<SourceFailure>,
}

impl LoadOutcome {
    pub fn dataset(&self, kind: SourceKind) -> Option<&TabularDataset> {
        self.loaded
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, ds)| ds)
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Load one CSV source from disk.
pub fn load_source(spec: &SourceSpec) -> Result<TabularDataset> {
    let file = std::fs::File::open(&spec.path)
        .with_context(|| format!("failed to open {} ({})", spec.path.display(), spec.kind.name()))?;
    load_from_reader(file, &spec.columns)
        .with_context(|| format!("failed to parse {} ({})", spec.path.display(), spec.kind.name()))
}

/// Load a CSV from any reader. Split out from `load_source` so tests can
/// feed in-memory data.
///
/// Ragged records are tolerated, header-bounded: a record shorter than
/// the header gets Missing for the absent cells, a record longer than
/// the header has its trailing cells dropped. The header row defines the
/// schema; stray cells have no column to land in.
pub fn load_from_reader<R: Read>(reader: R, columns: &ColumnMap) -> Result<TabularDataset> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .context("failed to read CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut dataset = TabularDataset::new(headers.clone());

    for record in rdr.records() {
        let record = record.context("failed to read CSV record")?;
        let mut row = Vec::with_capacity(headers.len());

        for (idx, header) in headers.iter().enumerate() {
            let raw = record.get(idx).unwrap_or("").trim();
            row.push(parse_cell(raw, header, columns));
        }

        dataset.push_row(row)?;
    }

    Ok(dataset)
}

/// Load several independent sources. Failures are collected, not
/// propagated: each dataset loads or fails on its own.
pub fn load_sources(specs: &[SourceSpec]) -> LoadOutcome {
    let mut loaded = Vec::new();
    let mut failures = Vec::new();

    for spec in specs {
        match load_source(spec) {
            Ok(dataset) => loaded.push((spec.kind, dataset)),
            Err(err) => failures.push(SourceFailure {
                kind: spec.kind,
                path: spec.path.clone(),
                reason: format!("{:#}", err),
            }),
        }
    }

    LoadOutcome { loaded, failures }
}

// ============================================================================
// CELL PARSING
// ============================================================================

fn parse_cell(raw: &str, header: &str, columns: &ColumnMap) -> Value {
    if columns.date.as_deref() == Some(header) {
        return match parse_date_lenient(raw) {
            Some(date) => Value::Date(date),
            None => Value::Missing,
        };
    }

    if columns.numeric.iter().any(|c| c == header) {
        return parse_number(raw);
    }

    if raw.is_empty() {
        Value::Missing
    } else {
        Value::Text(raw.to_string())
    }
}

/// Lenient date parse across the formats the upstream exports actually
/// use. Anything else is Missing for that row, never a load error.
pub fn parse_date_lenient(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%Y/%m/%d",
        "%d-%b-%Y",
        "%d %b %Y",
    ];

    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    // Timestamp with a date prefix ("2021-03-01T00:00:00" etc.)
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }

    None
}

/// Number parse: integers stay Int, decimals become Float, thousands
/// separators tolerated, everything else Missing.
pub fn parse_number(raw: &str) -> Value {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return Value::Missing;
    }

    if let Ok(n) = cleaned.parse::<i64>() {
        return Value::Int(n);
    }
    if let Ok(x) = cleaned.parse::<f64>() {
        return Value::Float(x);
    }

    Value::Missing
}

// ============================================================================
// TESTS
// ============================================================================
