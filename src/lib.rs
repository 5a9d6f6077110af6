// COVID Data Reconciliation - Core Library
// Ingests heterogeneous WHO/sales CSV exports, reconciles them onto a
// common (country code, date) key space, and produces the filtered,
// aggregated tables the presentation layer renders.

pub mod table;      // Uniform tabular representation (typed scalars)
pub mod countries;  // Free-text country names → canonical ISO-3 codes
pub mod loader;     // CSV sources → TabularDataset, lenient date parsing
pub mod filter;     // Conjunctive country/year/region/entity predicates
pub mod aggregate;  // Stable grouping + sum/mean reduction
pub mod metrics;    // Rates, KPI sets, deviation, series styles
pub mod merge;      // Alignment merge across disjoint coverage windows
pub mod pipeline;   // DataBundle handle + request-scoped orchestration

// Re-export commonly used types
pub use table::{TabularDataset, Value};
pub use countries::{
    CountryCode, CountryRegistry, NormalizationReport, Resolution,
};
pub use loader::{
    load_from_reader, load_source, load_sources, parse_date_lenient, parse_number,
    ColumnMap, LoadOutcome, SourceFailure, SourceKind, SourceSpec,
};
pub use filter::{ColumnBinding, DateRange, FilterEngine, FilterSpec};
pub use aggregate::{
    AggregatedRow, AggregatedTable, AggregatedValue, Aggregator, Reducer,
};
pub use metrics::{
    assign_styles, classify_deviation, derive_rate, derive_rate_aggregated,
    CountryKpis, Deviation, DeviationReport, MetricCalculator, Rate,
    SellerSummary, SeriesStyle,
};
pub use merge::{AlignmentMerger, KeyBinding, MergePolicy, TimeSeries};
pub use pipeline::{
    ComparisonSide, ComparisonSummary, DashboardRequest, DashboardTables, DataBundle,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
