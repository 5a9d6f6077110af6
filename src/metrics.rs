// 📊 Metric Calculator - Derived comparative metrics over aggregates
//
// Everything here is arithmetic over already-reduced values:
// - case-fatality rate (deaths / cases × 100, 2 decimal places)
// - per-country KPI sets for the indicator cards
// - per-seller KPI sets with deviation-from-average classification
// - deterministic display-attribute assignment for N selected series
//
// Division by a zero denominator yields Rate::Undefined, an explicit
// sentinel. A literal 0 here would read as "nobody died per case", which
// is a different claim than "we cannot compute this".

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregatedValue, Aggregator, Reducer};
use crate::countries::{CountryCode, CountryRegistry};
use crate::table::TabularDataset;

// ============================================================================
// RATE
// ============================================================================

/// A percentage rate, or the explicit "cannot be computed" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Rate {
    Defined(f64),
    Undefined,
}

impl Rate {
    pub fn value(&self) -> Option<f64> {
        match self {
            Rate::Defined(x) => Some(*x),
            Rate::Undefined => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Rate::Undefined)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Rate::Defined(x) => serde_json::json!(x),
            Rate::Undefined => serde_json::Value::Null,
        }
    }
}

/// numerator / denominator × 100, rounded to 2 decimal places.
/// Zero denominator → Undefined, never a silent 0.
pub fn derive_rate(numerator: f64, denominator: f64) -> Rate {
    if denominator == 0.0 {
        return Rate::Undefined;
    }
    Rate::Defined(round2(numerator / denominator * 100.0))
}

/// Rate over aggregated inputs. Either side being NoData means there were
/// no observations to divide, so the rate is Undefined too.
pub fn derive_rate_aggregated(numerator: AggregatedValue, denominator: AggregatedValue) -> Rate {
    match (numerator.as_f64(), denominator.as_f64()) {
        (Some(n), Some(d)) => derive_rate(n, d),
        _ => Rate::Undefined,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ============================================================================
// DEVIATION FROM BASELINE
// ============================================================================

/// Three-way comparison against a cross-entity baseline. Equal is its own
/// case: a value sitting exactly on the baseline is neither an increase
/// nor a decrease, and the presentation layer renders it without an arrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Deviation {
    Above,
    Below,
    Equal,
}

impl Deviation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Deviation::Above => "above",
            Deviation::Below => "below",
            Deviation::Equal => "equal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationReport {
    pub direction: Deviation,
    /// Absolute distance from the baseline, 2 decimal places.
    pub magnitude: f64,
}

impl DeviationReport {
    /// Plain-scalar record for the presentation handoff.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "direction": self.direction.as_str(),
            "magnitude": self.magnitude,
        })
    }
}

pub fn classify_deviation(value: f64, baseline: f64) -> DeviationReport {
    let direction = if value > baseline {
        Deviation::Above
    } else if value < baseline {
        Deviation::Below
    } else {
        Deviation::Equal
    };
    DeviationReport {
        direction,
        magnitude: round2((value - baseline).abs()),
    }
}

// ============================================================================
// COUNTRY KPIS
// ============================================================================

/// The per-country indicator card: totals plus case-fatality rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryKpis {
    pub code: CountryCode,
    pub display_name: String,
    pub total_cases: AggregatedValue,
    pub total_deaths: AggregatedValue,
    pub fatality_rate: Rate,
}

impl CountryKpis {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "country": self.code.as_str(),
            "display_name": self.display_name,
            "total_cases": self.total_cases.to_json(),
            "total_deaths": self.total_deaths.to_json(),
            "case_fatality_rate": self.fatality_rate.to_json(),
        })
    }
}

pub struct MetricCalculator;

impl MetricCalculator {
    /// KPI set per selected country over an already-filtered case series
    /// (country column holds canonical codes). Selection order is
    /// preserved; a country with no surviving rows still gets a card,
    /// with NoData totals and an Undefined rate.
    pub fn country_kpis(
        cases: &TabularDataset,
        country_column: &str,
        cases_column: &str,
        deaths_column: &str,
        selected: &[CountryCode],
        registry: &CountryRegistry,
    ) -> anyhow::Result<Vec<CountryKpis>> {
        let totals = Aggregator::aggregate(
            cases,
            &[country_column],
            &[(cases_column, Reducer::Sum), (deaths_column, Reducer::Sum)],
        )?;

        let kpis = selected
            .iter()
            .map(|code| {
                let row = (0..totals.len()).find(|&i| {
                    totals
                        .key(i, country_column)
                        .and_then(|v| v.as_text())
                        .map(|s| s == code.as_str())
                        .unwrap_or(false)
                });

                let (total_cases, total_deaths) = match row {
                    Some(i) => (
                        totals.value(i, cases_column).unwrap_or(AggregatedValue::NoData),
                        totals.value(i, deaths_column).unwrap_or(AggregatedValue::NoData),
                    ),
                    None => (AggregatedValue::NoData, AggregatedValue::NoData),
                };

                CountryKpis {
                    display_name: registry
                        .display_name(code)
                        .unwrap_or(code.as_str())
                        .to_string(),
                    code: code.clone(),
                    fatality_rate: derive_rate_aggregated(total_deaths, total_cases),
                    total_cases,
                    total_deaths,
                }
            })
            .collect();

        Ok(kpis)
    }
}

// ============================================================================
// SELLER KPIS
// ============================================================================

/// Per-seller summary card: reduced sales figures plus how the seller's
/// average compares to the overall average.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerSummary {
    pub name: String,
    pub region: Option<String>,
    pub units_sold: AggregatedValue,
    pub total_sales: AggregatedValue,
    pub average_sales: AggregatedValue,
    /// Seller average vs. the all-sellers average. None when either side
    /// has no observations.
    pub deviation: Option<DeviationReport>,
}

impl SellerSummary {
    /// Plain-scalar record: every "no data" sentinel exports as null,
    /// never as an enum-tagged object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "region": self.region,
            "units_sold": self.units_sold.to_json(),
            "total_sales": self.total_sales.to_json(),
            "average_sales": self.average_sales.to_json(),
            "deviation": self.deviation.map(|d| d.to_json()),
        })
    }

    /// Summarize one seller out of the (already region-filtered) sellers
    /// table. The baseline average is taken over `baseline`, normally the
    /// unfiltered table, matching how the overall average is quoted.
    pub fn for_seller(
        sellers: &TabularDataset,
        baseline: &TabularDataset,
        name: &str,
    ) -> anyhow::Result<SellerSummary> {
        let per_seller = Aggregator::aggregate(
            sellers,
            &["NAME"],
            &[
                ("SOLD UNITS", Reducer::Sum),
                ("TOTAL SALES", Reducer::Sum),
                ("SALES AVERAGE", Reducer::Mean),
            ],
        )?;

        let row = (0..per_seller.len()).find(|&i| {
            per_seller
                .key(i, "NAME")
                .and_then(|v| v.as_text())
                .map(|s| s == name)
                .unwrap_or(false)
        });

        let (units_sold, total_sales, average_sales) = match row {
            Some(i) => (
                per_seller.value(i, "SOLD UNITS").unwrap_or(AggregatedValue::NoData),
                per_seller.value(i, "TOTAL SALES").unwrap_or(AggregatedValue::NoData),
                per_seller.value(i, "SALES AVERAGE").unwrap_or(AggregatedValue::NoData),
            ),
            None => (
                AggregatedValue::NoData,
                AggregatedValue::NoData,
                AggregatedValue::NoData,
            ),
        };

        // region of the seller's first row, if the table carries one
        let region = sellers
            .rows()
            .iter()
            .enumerate()
            .find(|(i, _)| {
                sellers
                    .value(*i, "NAME")
                    .and_then(|v| v.as_text())
                    .map(|s| s == name)
                    .unwrap_or(false)
            })
            .and_then(|(i, _)| sellers.value(i, "REGION"))
            .and_then(|v| v.as_text())
            .map(|s| s.to_string());

        let overall = Self::overall_average(baseline)?;
        let deviation = match (average_sales.as_f64(), overall.as_f64()) {
            (Some(value), Some(baseline)) => Some(classify_deviation(value, baseline)),
            _ => None,
        };

        Ok(SellerSummary {
            name: name.to_string(),
            region,
            units_sold,
            total_sales,
            average_sales,
            deviation,
        })
    }

    /// Mean of SALES AVERAGE over the whole table (single group).
    fn overall_average(sellers: &TabularDataset) -> anyhow::Result<AggregatedValue> {
        let mut with_group = TabularDataset::new(vec!["_all".to_string(), "SALES AVERAGE".to_string()]);
        if let Some(col) = sellers.column_index("SALES AVERAGE") {
            for row in sellers.rows() {
                with_group.push_row(vec![
                    crate::table::Value::Int(0),
                    row[col].clone(),
                ])?;
            }
        }
        if with_group.is_empty() {
            return Ok(AggregatedValue::NoData);
        }
        let table =
            Aggregator::aggregate(&with_group, &["_all"], &[("SALES AVERAGE", Reducer::Mean)])?;
        Ok(table
            .value(0, "SALES AVERAGE")
            .unwrap_or(AggregatedValue::NoData))
    }
}

// ============================================================================
// SERIES STYLES
// ============================================================================

/// Display attributes for one plotted country series. Assigned from the
/// position in the selected-country sequence, so the mapping is stable
/// for any selection size - including zero or one countries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStyle {
    pub code: CountryCode,
    pub color: String,
    /// Vertical offset on the policy timeline strip, centered on 0.5.
    pub timeline_offset: f64,
    /// The focus country keeps a fixed highlight color.
    pub highlight: bool,
}

/// Focus-country highlight color and the rotating palette for peers.
const FOCUS_COLOR: &str = "#28b6ed";
const PEER_PALETTE: &[&str] = &[
    "#2ca02c", "#ff7f0e", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f", "#bcbd22", "#17becf",
];

const TIMELINE_BASE: f64 = 0.5;
const TIMELINE_STEP: f64 = 0.05;

/// Assign colors and timeline offsets to the selected countries, in
/// selection order. Peers rotate through the palette; offsets stagger
/// above/below the timeline so markers never overlap.
pub fn assign_styles(selected: &[CountryCode], focus: Option<&CountryCode>) -> Vec<SeriesStyle> {
    let mut peer_index = 0usize;

    selected
        .iter()
        .enumerate()
        .map(|(i, code)| {
            let highlight = focus.map(|f| f == code).unwrap_or(false);
            let color = if highlight {
                FOCUS_COLOR.to_string()
            } else {
                let c = PEER_PALETTE[peer_index % PEER_PALETTE.len()].to_string();
                peer_index += 1;
                c
            };

            // 0: +step, 1: -step, 2: +2*step, 3: -2*step, ...
            let rank = (i / 2 + 1) as f64;
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };

            SeriesStyle {
                code: code.clone(),
                color,
                timeline_offset: TIMELINE_BASE + sign * rank * TIMELINE_STEP,
                highlight,
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    fn code(c: &str) -> CountryCode {
        CountryCode::new(c).unwrap()
    }

    #[test]
    fn test_derive_rate_rounds_to_two_places() {
        assert_eq!(derive_rate(10.0, 200.0), Rate::Defined(5.0));
        assert_eq!(derive_rate(1.0, 3.0), Rate::Defined(33.33));
        assert_eq!(derive_rate(2.0, 3.0), Rate::Defined(66.67));
    }

    #[test]
    fn test_zero_denominator_is_undefined_not_zero() {
        assert_eq!(derive_rate(0.0, 0.0), Rate::Undefined);
        assert_eq!(derive_rate(10.0, 0.0), Rate::Undefined);
        assert!(derive_rate(0.0, 0.0).is_undefined());
        // numerator zero with real denominator IS a defined zero
        assert_eq!(derive_rate(0.0, 100.0), Rate::Defined(0.0));
    }

    #[test]
    fn test_rate_over_no_data_inputs() {
        assert_eq!(
            derive_rate_aggregated(AggregatedValue::NoData, AggregatedValue::Value(10.0)),
            Rate::Undefined
        );
        assert_eq!(
            derive_rate_aggregated(AggregatedValue::Value(5.0), AggregatedValue::NoData),
            Rate::Undefined
        );
        assert_eq!(
            derive_rate_aggregated(AggregatedValue::Value(5.0), AggregatedValue::Value(100.0)),
            Rate::Defined(5.0)
        );
    }

    #[test]
    fn test_deviation_three_way_classification() {
        assert_eq!(classify_deviation(10.0, 8.0).direction, Deviation::Above);
        assert_eq!(classify_deviation(6.0, 8.0).direction, Deviation::Below);
        // exactly on the baseline is its own case, not Above
        assert_eq!(classify_deviation(8.0, 8.0).direction, Deviation::Equal);
        assert_eq!(classify_deviation(8.0, 8.0).magnitude, 0.0);
        assert_eq!(classify_deviation(10.5, 8.0).magnitude, 2.5);
    }

    fn cases_fixture() -> TabularDataset {
        let mut ds = TabularDataset::new(vec![
            "Country".to_string(),
            "New_cases".to_string(),
            "New_deaths".to_string(),
        ]);
        let rows = vec![
            ("MEX", Value::Int(100), Value::Int(5)),
            ("BRA", Value::Int(500), Value::Int(10)),
        ];
        for (country, cases, deaths) in rows {
            ds.push_row(vec![Value::Text(country.to_string()), cases, deaths])
                .unwrap();
        }
        ds
    }

    #[test]
    fn test_country_kpis_fatality_rates() {
        let registry = CountryRegistry::with_defaults();
        let kpis = MetricCalculator::country_kpis(
            &cases_fixture(),
            "Country",
            "New_cases",
            "New_deaths",
            &[code("MEX"), code("BRA")],
            &registry,
        )
        .unwrap();

        assert_eq!(kpis.len(), 2);
        assert_eq!(kpis[0].display_name, "Mexico");
        assert_eq!(kpis[0].fatality_rate, Rate::Defined(5.0));
        assert_eq!(kpis[1].fatality_rate, Rate::Defined(2.0));
    }

    #[test]
    fn test_country_with_no_rows_gets_no_data_card() {
        let registry = CountryRegistry::with_defaults();
        let kpis = MetricCalculator::country_kpis(
            &cases_fixture(),
            "Country",
            "New_cases",
            "New_deaths",
            &[code("ARG")],
            &registry,
        )
        .unwrap();

        assert_eq!(kpis.len(), 1);
        assert!(kpis[0].total_cases.is_no_data());
        assert!(kpis[0].fatality_rate.is_undefined());
    }

    #[test]
    fn test_assign_styles_any_selection_size() {
        let mex = code("MEX");

        // zero countries: no styles, no panic
        assert!(assign_styles(&[], Some(&mex)).is_empty());

        // one country (the focus): highlight, no peers consumed
        let one = assign_styles(&[mex.clone()], Some(&mex));
        assert_eq!(one.len(), 1);
        assert!(one[0].highlight);
        assert_eq!(one[0].color, FOCUS_COLOR);

        // five countries: colors deterministic, offsets distinct
        let five: Vec<CountryCode> = ["MEX", "BRA", "ARG", "CHL", "COL"]
            .iter()
            .map(|c| code(c))
            .collect();
        let styles = assign_styles(&five, Some(&mex));
        assert_eq!(styles.len(), 5);
        let mut offsets: Vec<_> = styles.iter().map(|s| s.timeline_offset.to_bits()).collect();
        offsets.sort();
        offsets.dedup();
        assert_eq!(offsets.len(), 5);
        // peers pull from the palette in order, skipping the focus slot
        assert_eq!(styles[1].color, PEER_PALETTE[0]);
        assert_eq!(styles[2].color, PEER_PALETTE[1]);
    }

    #[test]
    fn test_assign_styles_is_deterministic() {
        let selection: Vec<CountryCode> =
            ["BRA", "MEX"].iter().map(|c| code(c)).collect();
        let a = assign_styles(&selection, Some(&code("MEX")));
        let b = assign_styles(&selection, Some(&code("MEX")));
        assert_eq!(a, b);
    }

    fn sellers_fixture() -> TabularDataset {
        let mut ds = TabularDataset::new(vec![
            "NAME".to_string(),
            "REGION".to_string(),
            "SOLD UNITS".to_string(),
            "TOTAL SALES".to_string(),
            "SALES AVERAGE".to_string(),
        ]);
        let rows = vec![
            ("Ana", "North", 40, 4000.0, 100.0),
            ("Luis", "South", 10, 600.0, 60.0),
            ("Ana", "North", 20, 1600.0, 80.0),
        ];
        for (name, region, units, total, avg) in rows {
            ds.push_row(vec![
                Value::Text(name.to_string()),
                Value::Text(region.to_string()),
                Value::Int(units),
                Value::Float(total),
                Value::Float(avg),
            ])
            .unwrap();
        }
        ds
    }

    #[test]
    fn test_seller_summary_kpis_and_deviation() {
        let sellers = sellers_fixture();
        let summary = SellerSummary::for_seller(&sellers, &sellers, "Ana").unwrap();

        assert_eq!(summary.region.as_deref(), Some("North"));
        assert_eq!(summary.units_sold, AggregatedValue::Value(60.0));
        assert_eq!(summary.total_sales, AggregatedValue::Value(5600.0));
        assert_eq!(summary.average_sales, AggregatedValue::Value(90.0));

        // Ana's 90 vs overall mean (100+60+80)/3 = 80
        let deviation = summary.deviation.unwrap();
        assert_eq!(deviation.direction, Deviation::Above);
        assert_eq!(deviation.magnitude, 10.0);
    }

    #[test]
    fn test_seller_json_is_scalar_or_null() {
        let sellers = sellers_fixture();

        let summary = SellerSummary::for_seller(&sellers, &sellers, "Ana").unwrap();
        let json = summary.to_json();
        assert!(json["units_sold"].is_number());
        assert!(json["average_sales"].is_number());
        assert_eq!(json["deviation"]["direction"], serde_json::json!("above"));

        // the no-data sentinel flattens to null, not an enum tag
        let empty = SellerSummary::for_seller(&sellers, &sellers, "Nadie").unwrap();
        let json = empty.to_json();
        assert!(json["units_sold"].is_null());
        assert!(json["deviation"].is_null());
    }

    #[test]
    fn test_unknown_seller_gets_no_data() {
        let sellers = sellers_fixture();
        let summary = SellerSummary::for_seller(&sellers, &sellers, "Nadie").unwrap();
        assert!(summary.units_sold.is_no_data());
        assert!(summary.deviation.is_none());
    }
}
