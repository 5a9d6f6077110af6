// 🔗 Pipeline - One request-scoped pass over an explicit data handle
//
// DataBundle is the immutable handle over everything loaded: no
// module-level globals, no singleton cache. Build it once, pass it into
// every request. Re-running a request over the same bundle is a pure
// function call.
//
// One DashboardRequest run:
//   normalize selections → filter cases → KPIs + daily series
//   → merge uptake archive + current → filter + aggregate doses
//   → filter policy events → comparison summary → seller summary
//
// Any section whose source dataset failed to load is simply absent from
// the output; the failures list says which source and why.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::aggregate::{AggregatedTable, AggregatedValue, Aggregator, Reducer};
use crate::countries::{CountryCode, CountryRegistry, NormalizationReport};
use crate::filter::{ColumnBinding, DateRange, FilterEngine, FilterSpec};
use crate::loader::{self, LoadOutcome, SourceFailure, SourceKind, SourceSpec};
use crate::merge::{AlignmentMerger, KeyBinding, MergePolicy, TimeSeries};
use crate::metrics::{
    assign_styles, CountryKpis, MetricCalculator, SellerSummary, SeriesStyle,
};
use crate::table::TabularDataset;

// ============================================================================
// DATA BUNDLE
// ============================================================================

/// Everything one request needs, loaded once. Country key columns are
/// already canonicalized to ISO-3 codes (unresolved names → Missing), and
/// the per-source normalization reports are kept for diagnostics.
pub struct DataBundle {
    pub cases: Option<TabularDataset>,
    pub uptake_archive: Option<TabularDataset>,
    pub uptake_current: Option<TabularDataset>,
    pub policy: Option<TabularDataset>,
    pub sellers: Option<TabularDataset>,

    pub registry: CountryRegistry,
    /// Sources that failed to load, isolated from the rest.
    pub failures: Vec<SourceFailure>,
    /// Raw row counts per loaded source, before any filtering.
    pub raw_counts: Vec<(SourceKind, usize)>,
    /// Unresolved-name tallies from canonicalizing each source's key.
    pub key_reports: Vec<(SourceKind, NormalizationReport)>,
}

impl DataBundle {
    /// Build a bundle from a load outcome: canonicalize each source's
    /// country key column and record what failed to resolve.
    pub fn from_outcome(outcome: LoadOutcome, registry: CountryRegistry) -> Result<Self> {
        let mut bundle = DataBundle {
            cases: None,
            uptake_archive: None,
            uptake_current: None,
            policy: None,
            sellers: None,
            registry,
            failures: outcome.failures,
            raw_counts: Vec::new(),
            key_reports: Vec::new(),
        };

        for (kind, dataset) in outcome.loaded {
            bundle.raw_counts.push((kind, dataset.len()));

            let dataset = match kind.default_columns().country {
                Some(country_col) if dataset.has_column(&country_col) => {
                    let (canonical, report) =
                        bundle.registry.canonicalize_column(&dataset, &country_col)?;
                    bundle.key_reports.push((kind, report));
                    canonical
                }
                _ => dataset,
            };

            match kind {
                SourceKind::CaseSeries => bundle.cases = Some(dataset),
                SourceKind::UptakeArchive => bundle.uptake_archive = Some(dataset),
                SourceKind::UptakeCurrent => bundle.uptake_current = Some(dataset),
                SourceKind::PolicyEvents => bundle.policy = Some(dataset),
                SourceKind::SellerTable => bundle.sellers = Some(dataset),
            }
        }

        Ok(bundle)
    }

    /// Load the standard source files from one directory. Missing files
    /// fail per-source; the sellers table is optional and only attempted
    /// when present.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut specs = vec![
            SourceSpec::new(SourceKind::CaseSeries, dir.join("WHO_COVID_daily_data.csv")),
            SourceSpec::new(
                SourceKind::UptakeArchive,
                dir.join("COV_VAC_UPTAKE_2021_2023.csv"),
            ),
            SourceSpec::new(SourceKind::UptakeCurrent, dir.join("COV_VAC_UPTAKE_2024.csv")),
            SourceSpec::new(SourceKind::PolicyEvents, dir.join("COV_VAC_POLICY_2024.csv")),
        ];

        let sellers_path = dir.join("sellers.csv");
        if sellers_path.exists() {
            specs.push(SourceSpec::new(SourceKind::SellerTable, sellers_path));
        }

        let outcome = loader::load_sources(&specs);
        DataBundle::from_outcome(outcome, CountryRegistry::with_defaults())
    }

    /// Span of years covered by the case series, for a full-range default.
    pub fn case_year_span(&self) -> Option<(i32, i32)> {
        let cases = self.cases.as_ref()?;
        let years: Vec<i32> = cases
            .column_values("Date_reported")
            .iter()
            .filter_map(|v| v.year())
            .collect();
        let min = *years.iter().min()?;
        let max = *years.iter().max()?;
        Some((min, max))
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// One user request: which countries (free text, as the user typed or
/// picked them), which years, and the optional seller-view parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardRequest {
    pub countries: Vec<String>,
    pub years: DateRange,
    /// Country highlighted across all views, if any.
    pub focus: Option<String>,
    /// Seller-view predicates (ignored when no sellers table is loaded).
    pub region: Option<String>,
    pub seller: Option<String>,
    /// How to resolve uptake rows reported in both coverage windows.
    pub merge_policy: MergePolicy,
}

impl DashboardRequest {
    pub fn new(countries: Vec<String>, years: DateRange) -> Self {
        DashboardRequest {
            countries,
            years,
            focus: None,
            region: None,
            seller: None,
            merge_policy: MergePolicy::LastSourceWins,
        }
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    /// Run the full pass over the bundle. Synchronous, no shared state:
    /// the same request over the same bundle always produces the same
    /// tables.
    pub fn run(&self, bundle: &DataBundle) -> Result<DashboardTables> {
        // 1. Canonicalize the user's selection; unresolved picks are
        //    excluded and reported, never guessed at.
        let (selected, selection_report) = bundle.registry.normalize_all(&self.countries);
        let focus = self
            .focus
            .as_deref()
            .and_then(|name| bundle.registry.normalize(name).code().cloned())
            .filter(|code| selected.contains(code));

        let spec = FilterSpec::new(selected.clone(), self.years);

        // 2. Case series: KPIs + daily (country, date) sums.
        let mut kpis = Vec::new();
        let mut case_series = None;
        if let Some(cases) = bundle.cases.as_ref() {
            let binding = ColumnBinding::keyed("Country", "Date_reported");
            let filtered = FilterEngine::apply(cases, &spec, &binding)?;

            kpis = MetricCalculator::country_kpis(
                &filtered,
                "Country",
                "New_cases",
                "New_deaths",
                &selected,
                &bundle.registry,
            )?;

            let mut daily = Aggregator::aggregate(
                &filtered,
                &["Country", "Date_reported"],
                &[("New_cases", Reducer::Sum), ("New_deaths", Reducer::Sum)],
            )?;
            daily.sort_chronological("Date_reported")?;
            case_series = Some(daily);
        }

        // 3. Uptake: merge the two coverage windows, then filter and
        //    aggregate doses per (country, date).
        let mut uptake_series = None;
        let mut merged_uptake = None;
        let uptake_sources: Vec<&TabularDataset> = [
            bundle.uptake_archive.as_ref(),
            bundle.uptake_current.as_ref(),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !uptake_sources.is_empty() {
            let key = KeyBinding::new("COUNTRY", "DATE");
            let series = AlignmentMerger::merge(&uptake_sources, &key, self.merge_policy)?;

            let binding = ColumnBinding::keyed("COUNTRY", "DATE");
            let filtered = FilterEngine::apply(&series.dataset, &spec, &binding)?;

            let mut doses = Aggregator::aggregate(
                &filtered,
                &["COUNTRY", "DATE"],
                &[("COVID_VACCINE_ADM_1D", Reducer::Sum)],
            )?;
            doses.sort_chronological("DATE")?;
            uptake_series = Some(doses);
            merged_uptake = Some(series);
        }

        // 4. Policy events for the selected countries and years.
        let policy_events = match bundle.policy.as_ref() {
            Some(policy) => {
                let binding = ColumnBinding::keyed("COUNTRY", "DATE");
                Some(FilterEngine::apply(policy, &spec, &binding)?)
            }
            None => None,
        };

        // 5. Focus-vs-peer narrative numbers.
        let comparison = self.comparison_summary(
            &selected,
            focus.as_ref(),
            &kpis,
            uptake_series.as_ref(),
            bundle,
        );

        // 6. Seller view, when a sales table is present.
        let seller = match (bundle.sellers.as_ref(), self.seller.as_deref()) {
            (Some(sellers), Some(name)) => {
                let binding = ColumnBinding::categorical("REGION", "NAME");
                let mut region_spec = FilterSpec::new(Vec::new(), self.years);
                region_spec.region = self.region.clone();
                let scoped = FilterEngine::apply(sellers, &region_spec, &binding)?;
                Some(SellerSummary::for_seller(&scoped, sellers, name)?)
            }
            _ => None,
        };

        let styles = assign_styles(&selected, focus.as_ref());

        Ok(DashboardTables {
            selected,
            unresolved_selections: selection_report.unresolved,
            kpis,
            case_series,
            styles,
            uptake_series,
            merged_uptake,
            policy_events,
            comparison,
            seller,
        })
    }

    /// Totals for the focus country against the first non-focus selected
    /// country. None unless both sides exist.
    fn comparison_summary(
        &self,
        selected: &[CountryCode],
        focus: Option<&CountryCode>,
        kpis: &[CountryKpis],
        uptake_series: Option<&AggregatedTable>,
        bundle: &DataBundle,
    ) -> Option<ComparisonSummary> {
        let focus = focus?;
        let peer = selected.iter().find(|c| *c != focus)?;

        let side = |code: &CountryCode| -> ComparisonSide {
            let total_cases = kpis
                .iter()
                .find(|k| &k.code == code)
                .map(|k| k.total_cases)
                .unwrap_or(AggregatedValue::NoData);

            // Sum of the per-(country, date) dose sums for this country.
            let total_doses = match uptake_series {
                Some(table) => {
                    let mut sum = 0.0;
                    let mut contributed = false;
                    for i in 0..table.len() {
                        let matches = table
                            .key(i, "COUNTRY")
                            .and_then(|v| v.as_text())
                            .map(|s| s == code.as_str())
                            .unwrap_or(false);
                        if matches {
                            if let Some(x) =
                                table.value(i, "COVID_VACCINE_ADM_1D").and_then(|v| v.as_f64())
                            {
                                sum += x;
                                contributed = true;
                            }
                        }
                    }
                    if contributed {
                        AggregatedValue::Value(sum)
                    } else {
                        AggregatedValue::NoData
                    }
                }
                None => AggregatedValue::NoData,
            };

            ComparisonSide {
                display_name: bundle
                    .registry
                    .display_name(code)
                    .unwrap_or(code.as_str())
                    .to_string(),
                code: code.clone(),
                total_cases,
                total_doses,
            }
        };

        Some(ComparisonSummary {
            start_year: self.years.start_year(),
            end_year: self.years.end_year(),
            focus: side(focus),
            peer: side(peer),
        })
    }
}

// ============================================================================
// OUTPUT TABLES
// ============================================================================

/// One side of the focus-vs-peer panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSide {
    pub code: CountryCode,
    pub display_name: String,
    pub total_cases: AggregatedValue,
    pub total_doses: AggregatedValue,
}

impl ComparisonSide {
    /// Plain-scalar record: totals export as bare numbers or null.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "country": self.code.as_str(),
            "display_name": self.display_name,
            "total_cases": self.total_cases.to_json(),
            "total_doses": self.total_doses.to_json(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub start_year: i32,
    pub end_year: i32,
    pub focus: ComparisonSide,
    pub peer: ComparisonSide,
}

impl ComparisonSummary {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "start_year": self.start_year,
            "end_year": self.end_year,
            "focus": self.focus.to_json(),
            "peer": self.peer.to_json(),
        })
    }
}

/// Everything the presentation layer consumes for one request. Plain
/// data only - no formatting, units or locale concerns.
pub struct DashboardTables {
    pub selected: Vec<CountryCode>,
    pub unresolved_selections: Vec<String>,
    pub kpis: Vec<CountryKpis>,
    pub case_series: Option<AggregatedTable>,
    pub styles: Vec<SeriesStyle>,
    pub uptake_series: Option<AggregatedTable>,
    pub merged_uptake: Option<TimeSeries>,
    pub policy_events: Option<TabularDataset>,
    pub comparison: Option<ComparisonSummary>,
    pub seller: Option<SellerSummary>,
}

impl DashboardTables {
    /// Language-neutral handoff: column-name → scalar records throughout,
    /// nulls for every "no data" sentinel.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "selected": self.selected.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "unresolved_selections": self.unresolved_selections,
            "kpis": self.kpis.iter().map(|k| k.to_json()).collect::<Vec<_>>(),
            "case_series": self.case_series.as_ref().map(|t| t.to_json_records()),
            "styles": self.styles,
            "uptake_series": self.uptake_series.as_ref().map(|t| t.to_json_records()),
            "policy_events": self.policy_events.as_ref().map(|t| t.to_json_records()),
            "comparison": self.comparison.as_ref().map(|c| c.to_json()),
            "seller": self.seller.as_ref().map(|s| s.to_json()),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_from_reader;

    fn outcome_from_csv(sources: &[(SourceKind, &str)]) -> LoadOutcome {
        let loaded = sources
            .iter()
            .map(|(kind, csv)| {
                let ds = load_from_reader(csv.as_bytes(), &kind.default_columns()).unwrap();
                (*kind, ds)
            })
            .collect();
        LoadOutcome {
            loaded,
            failures: Vec::new(),
        }
    }

    fn test_bundle() -> DataBundle {
        let cases = "Date_reported,Country,New_cases,New_deaths\n\
                     2021-02-01,Mexico,100,5\n\
                     2021-02-01,Brazil,500,10\n\
                     2021-03-01,Wakanda,999,1\n";
        let uptake_archive = "COUNTRY,DATE,COVID_VACCINE_ADM_1D\n\
                              MEX,2021-05-01,1000\n\
                              MEX,2022-02-01,2000\n\
                              BRA,2021-06-01,3000\n";
        let uptake_current = "COUNTRY,DATE,COVID_VACCINE_ADM_1D\n\
                              MEX,2024-01-15,500\n\
                              BRA,2024-01-20,700\n";
        let policy = "COUNTRY,DATE,POLICY\n\
                      MEX,2024-02-01,Booster campaign\n\
                      BRA,2024-03-01,School mandate\n";

        let outcome = outcome_from_csv(&[
            (SourceKind::CaseSeries, cases),
            (SourceKind::UptakeArchive, uptake_archive),
            (SourceKind::UptakeCurrent, uptake_current),
            (SourceKind::PolicyEvents, policy),
        ]);

        DataBundle::from_outcome(outcome, CountryRegistry::with_defaults()).unwrap()
    }

    #[test]
    fn test_end_to_end_fatality_rates() {
        let bundle = test_bundle();
        let request = DashboardRequest::new(
            vec!["Mexico".to_string(), "Brazil".to_string()],
            DateRange::new(2021, 2024).unwrap(),
        )
        .with_focus("Mexico");

        let tables = request.run(&bundle).unwrap();

        assert_eq!(tables.kpis.len(), 2);
        assert_eq!(tables.kpis[0].fatality_rate.value(), Some(5.0));
        assert_eq!(tables.kpis[1].fatality_rate.value(), Some(2.0));
    }

    #[test]
    fn test_unresolved_selection_excluded_and_reported() {
        let bundle = test_bundle();
        let request = DashboardRequest::new(
            vec!["Mexico".to_string(), "Narnia".to_string()],
            DateRange::new(2021, 2024).unwrap(),
        );

        let tables = request.run(&bundle).unwrap();

        assert_eq!(tables.selected.len(), 1);
        assert_eq!(tables.unresolved_selections, vec!["Narnia".to_string()]);
    }

    #[test]
    fn test_unresolved_source_rows_are_observable() {
        let bundle = test_bundle();
        // "Wakanda" in the case series failed canonicalization
        let report = bundle
            .key_reports
            .iter()
            .find(|(kind, _)| *kind == SourceKind::CaseSeries)
            .map(|(_, r)| r)
            .unwrap();
        assert_eq!(report.unresolved, vec!["Wakanda".to_string()]);
        // raw counts still include the unresolved row
        assert_eq!(
            bundle.raw_counts.iter().find(|(k, _)| *k == SourceKind::CaseSeries),
            Some(&(SourceKind::CaseSeries, 3))
        );
    }

    #[test]
    fn test_uptake_merge_preserves_gap_years() {
        let bundle = test_bundle();
        let request = DashboardRequest::new(
            vec!["Mexico".to_string()],
            DateRange::new(2021, 2024).unwrap(),
        );

        let tables = request.run(&bundle).unwrap();
        let merged = tables.merged_uptake.unwrap();

        // archive covers 2021-2022, current covers 2024: 2023 stays absent
        assert_eq!(merged.years_for("MEX"), vec![2021, 2022, 2024]);
    }

    #[test]
    fn test_empty_selection_yields_empty_tables() {
        let bundle = test_bundle();
        let request =
            DashboardRequest::new(Vec::new(), DateRange::new(2021, 2024).unwrap());

        let tables = request.run(&bundle).unwrap();

        assert!(tables.kpis.is_empty());
        assert!(tables.case_series.unwrap().is_empty());
        assert!(tables.uptake_series.unwrap().is_empty());
        assert!(tables.styles.is_empty());
        assert!(tables.comparison.is_none());
    }

    #[test]
    fn test_comparison_summary_focus_vs_first_peer() {
        let bundle = test_bundle();
        let request = DashboardRequest::new(
            vec!["Mexico".to_string(), "Brazil".to_string()],
            DateRange::new(2021, 2024).unwrap(),
        )
        .with_focus("Mexico");

        let tables = request.run(&bundle).unwrap();
        let comparison = tables.comparison.unwrap();

        assert_eq!(comparison.focus.code.as_str(), "MEX");
        assert_eq!(comparison.peer.code.as_str(), "BRA");
        assert_eq!(
            comparison.focus.total_doses,
            AggregatedValue::Value(3500.0)
        );
        assert_eq!(comparison.peer.total_doses, AggregatedValue::Value(3700.0));
        assert_eq!(comparison.focus.total_cases, AggregatedValue::Value(100.0));
    }

    #[test]
    fn test_missing_source_drops_section_not_request() {
        let cases = "Date_reported,Country,New_cases,New_deaths\n\
                     2021-02-01,Mexico,100,5\n";
        let outcome = outcome_from_csv(&[(SourceKind::CaseSeries, cases)]);
        let bundle = DataBundle::from_outcome(outcome, CountryRegistry::with_defaults()).unwrap();

        let request = DashboardRequest::new(
            vec!["Mexico".to_string()],
            DateRange::new(2021, 2024).unwrap(),
        );
        let tables = request.run(&bundle).unwrap();

        assert!(tables.case_series.is_some());
        assert!(tables.uptake_series.is_none());
        assert!(tables.policy_events.is_none());
    }

    #[test]
    fn test_policy_events_filtered_by_selection() {
        let bundle = test_bundle();
        let request = DashboardRequest::new(
            vec!["Brazil".to_string()],
            DateRange::new(2024, 2024).unwrap(),
        );

        let tables = request.run(&bundle).unwrap();
        let events = tables.policy_events.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(
            events.value(0, "POLICY"),
            Some(&crate::table::Value::Text("School mandate".to_string()))
        );
    }

    #[test]
    fn test_case_year_span() {
        let bundle = test_bundle();
        assert_eq!(bundle.case_year_span(), Some((2021, 2021)));
    }

    #[test]
    fn test_to_json_handoff_shape() {
        let bundle = test_bundle();
        let request = DashboardRequest::new(
            vec!["Mexico".to_string(), "Brazil".to_string()],
            DateRange::new(2021, 2024).unwrap(),
        )
        .with_focus("Mexico");

        let json = request.run(&bundle).unwrap().to_json();

        assert_eq!(json["selected"], serde_json::json!(["MEX", "BRA"]));
        assert_eq!(json["kpis"][0]["case_fatality_rate"], serde_json::json!(5.0));
        assert!(json["case_series"].is_array());
    }

    #[test]
    fn test_comparison_and_seller_json_export_plain_scalars() {
        let cases = "Date_reported,Country,New_cases,New_deaths\n\
                     2021-02-01,Mexico,100,5\n\
                     2021-02-01,Brazil,500,10\n";
        let uptake = "COUNTRY,DATE,COVID_VACCINE_ADM_1D\n\
                      MEX,2021-05-01,1000\n\
                      BRA,2021-06-01,3000\n";
        let sellers = "NAME,REGION,SOLD UNITS,TOTAL SALES,SALES AVERAGE\n\
                       Ana,North,40,8000,200\n\
                       Luis,North,10,1000,100\n";
        let outcome = outcome_from_csv(&[
            (SourceKind::CaseSeries, cases),
            (SourceKind::UptakeArchive, uptake),
            (SourceKind::SellerTable, sellers),
        ]);
        let bundle = DataBundle::from_outcome(outcome, CountryRegistry::with_defaults()).unwrap();

        let mut request = DashboardRequest::new(
            vec!["Mexico".to_string(), "Brazil".to_string()],
            DateRange::new(2021, 2024).unwrap(),
        )
        .with_focus("Mexico");
        request.seller = Some("Ana".to_string());

        let json = request.run(&bundle).unwrap().to_json();

        // totals are bare numbers, never tagged enum objects
        let doses = &json["comparison"]["focus"]["total_doses"];
        assert_eq!(doses, &serde_json::json!(1000.0));
        assert!(doses.is_number() || doses.is_null());
        assert_eq!(
            json["comparison"]["peer"]["total_cases"],
            serde_json::json!(500.0)
        );

        // seller section: scalar-or-null fields only
        assert_eq!(json["seller"]["units_sold"], serde_json::json!(40.0));
        assert_eq!(json["seller"]["deviation"]["direction"], serde_json::json!("above"));
        for field in ["units_sold", "total_sales", "average_sales"] {
            let v = &json["seller"][field];
            assert!(v.is_number() || v.is_null(), "{} must be scalar or null", field);
        }
    }
}
