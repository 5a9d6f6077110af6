// 🌎 Country Registry - Free-text country names → canonical ISO-3 codes
//
// Problem solved:
// - "Mexico", " mexico ", "MEXICO" → All the same country code "MEX"
// - WHO exports spell the same country differently per file
//   ("Bolivia" vs "Bolivia (Plurinational State of)")
// - A name nobody recognizes must surface as an explicit Unresolved value,
//   never as a silent default and never as a panic.
//
// Unresolved names are excluded from joins and filters downstream; the
// registry reports how many (and which) inputs failed so the caller can
// show diagnostics instead of silently losing rows.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use anyhow::{anyhow, Result};

use crate::table::{TabularDataset, Value};

// ============================================================================
// COUNTRY CODE
// ============================================================================

/// Canonical 3-letter uppercase country identifier (ISO 3166-1 alpha-3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CountryCode(String);

impl CountryCode {
    /// Build a code, validating the 3-letter shape.
    pub fn new(code: &str) -> Result<Self> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(anyhow!("not a 3-letter country code: {:?}", code));
        }
        Ok(CountryCode(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CountryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Outcome of canonicalizing one name. `Unresolved` carries the original
/// input so diagnostics can name the offending spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    Code(CountryCode),
    Unresolved(String),
}

impl Resolution {
    pub fn code(&self) -> Option<&CountryCode> {
        match self {
            Resolution::Code(c) => Some(c),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Resolution::Unresolved(_))
    }
}

/// Tally of a batch canonicalization run. Exposed, not swallowed: the
/// caller decides whether a pile of unresolved names is worth reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub resolved: usize,
    pub unresolved: Vec<String>,
}

impl NormalizationReport {
    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    pub fn record(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Code(_) => self.resolved += 1,
            Resolution::Unresolved(name) => {
                if !self.unresolved.contains(name) {
                    self.unresolved.push(name.clone());
                }
            }
        }
    }
}

// ============================================================================
// COUNTRY REGISTRY
// ============================================================================

/// Static reference table: normalized spelling → code, code → display name.
/// Pure lookup, no interior state mutation after construction.
pub struct CountryRegistry {
    by_name: HashMap<String, CountryCode>,
    display: HashMap<CountryCode, String>,
}

impl CountryRegistry {
    pub fn new() -> Self {
        CountryRegistry {
            by_name: HashMap::new(),
            display: HashMap::new(),
        }
    }

    /// Registry with the WHO Americas reference set pre-loaded.
    pub fn with_defaults() -> Self {
        let mut registry = CountryRegistry::new();
        registry.register_default_countries();
        registry
    }

    /// Register one country: canonical display name plus alternate spellings.
    pub fn register(&mut self, code: &str, display_name: &str, aliases: &[&str]) -> Result<()> {
        let code = CountryCode::new(code)?;
        self.by_name
            .insert(normalize_country_string(display_name), code.clone());
        for alias in aliases {
            self.by_name
                .insert(normalize_country_string(alias), code.clone());
        }
        self.display.insert(code, display_name.to_string());
        Ok(())
    }

    fn register_default_countries(&mut self) {
        // Latin American peer set plus the WHO's long-form labels.
        // Every code in this table is a well-formed literal.
        let table: &[(&str, &str, &[&str])] = &[
            ("MEX", "Mexico", &["México", "United Mexican States"]),
            ("BRA", "Brazil", &["Brasil", "Federative Republic of Brazil"]),
            ("ARG", "Argentina", &["Argentine Republic"]),
            ("CHL", "Chile", &["Republic of Chile"]),
            ("COL", "Colombia", &["Republic of Colombia"]),
            ("PER", "Peru", &["Perú", "Republic of Peru"]),
            (
                "BOL",
                "Bolivia",
                &["Bolivia (Plurinational State of)", "Plurinational State of Bolivia"],
            ),
            (
                "VEN",
                "Venezuela",
                &["Venezuela (Bolivarian Republic of)", "Bolivarian Republic of Venezuela"],
            ),
            ("ECU", "Ecuador", &["Republic of Ecuador"]),
            ("URY", "Uruguay", &["Oriental Republic of Uruguay"]),
            ("PRY", "Paraguay", &["Republic of Paraguay"]),
            ("GTM", "Guatemala", &["Republic of Guatemala"]),
            ("HND", "Honduras", &["Republic of Honduras"]),
            ("SLV", "El Salvador", &["Republic of El Salvador"]),
            ("NIC", "Nicaragua", &["Republic of Nicaragua"]),
            ("CRI", "Costa Rica", &["Republic of Costa Rica"]),
            ("PAN", "Panama", &["Panamá", "Republic of Panama"]),
            ("CUB", "Cuba", &["Republic of Cuba"]),
            ("DOM", "Dominican Republic", &[]),
            ("HTI", "Haiti", &["Republic of Haiti"]),
            (
                "USA",
                "United States",
                &["United States of America", "USA", "US"],
            ),
            ("CAN", "Canada", &[]),
        ];

        for (code, display_name, aliases) in table {
            let _ = self.register(code, display_name, aliases);
        }
    }

    /// Canonicalize one free-text name. Whitespace and case variations
    /// resolve; a bare 3-letter code that is already registered resolves
    /// to itself; anything else is Unresolved.
    pub fn normalize(&self, name: &str) -> Resolution {
        let key = normalize_country_string(name);
        if let Some(code) = self.by_name.get(&key) {
            return Resolution::Code(code.clone());
        }

        // Already a known code? (uptake/policy files key by ISO-3 directly)
        if let Ok(code) = CountryCode::new(name) {
            if self.display.contains_key(&code) {
                return Resolution::Code(code);
            }
        }

        Resolution::Unresolved(name.trim().to_string())
    }

    /// Canonicalize a batch, keeping only the resolved codes (input order,
    /// duplicates removed) and tallying the rest.
    pub fn normalize_all(&self, names: &[String]) -> (Vec<CountryCode>, NormalizationReport) {
        let mut codes = Vec::new();
        let mut report = NormalizationReport::default();

        for name in names {
            let resolution = self.normalize(name);
            report.record(&resolution);
            if let Resolution::Code(code) = resolution {
                if !codes.contains(&code) {
                    codes.push(code);
                }
            }
        }

        (codes, report)
    }

    /// Reverse lookup for the presentation layer.
    pub fn display_name(&self, code: &CountryCode) -> Option<&str> {
        self.display.get(code).map(|s| s.as_str())
    }

    /// Rewrite a dataset's country column to canonical codes.
    /// Unresolved names become Missing cells (excluded by any later
    /// membership filter); the report says what failed to resolve.
    /// Rows are retained here - exclusion is the filter's job.
    pub fn canonicalize_column(
        &self,
        dataset: &TabularDataset,
        column: &str,
    ) -> Result<(TabularDataset, NormalizationReport)> {
        let mut report = NormalizationReport::default();

        let rewritten = dataset.map_column(column, |cell| match cell {
            Value::Text(name) => {
                let resolution = self.normalize(name);
                report.record(&resolution);
                match resolution {
                    Resolution::Code(code) => Value::Text(code.as_str().to_string()),
                    Resolution::Unresolved(_) => Value::Missing,
                }
            }
            other => other.clone(),
        })?;

        Ok((rewritten, report))
    }
}

impl Default for CountryRegistry {
    fn default() -> Self {
        CountryRegistry::with_defaults()
    }
}

// ============================================================================
// STRING NORMALIZATION
// ============================================================================

/// Lookup key for a country name: trimmed, case-folded, inner whitespace
/// collapsed.
fn normalize_country_string(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// TESTS
// ============================================================================
