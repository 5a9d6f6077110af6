use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::Path;

use covid_reconcile::{DashboardRequest, DataBundle, DateRange};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let json_only = args.iter().any(|a| a == "--json");
    let positional: Vec<&String> = args[1..].iter().filter(|a| !a.starts_with("--")).collect();

    if positional.is_empty() {
        eprintln!("Usage: covid-reconcile <data-dir> [countries] [start-end] [--json]");
        eprintln!("  countries  comma-separated names (default: Mexico,Brazil)");
        eprintln!("  start-end  inclusive year range   (default: full case span)");
        std::process::exit(1);
    }

    let data_dir = Path::new(positional[0]);
    let countries: Vec<String> = positional
        .get(1)
        .map(|s| s.split(',').map(|c| c.trim().to_string()).collect())
        .unwrap_or_else(|| vec!["Mexico".to_string(), "Brazil".to_string()]);

    println!("🌎 COVID Data Reconciliation Pipeline");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load all sources (independently; one bad file doesn't stop the rest)
    println!("\n📂 Loading sources from {}...", data_dir.display());
    let bundle = DataBundle::load_dir(data_dir)?;

    for (kind, count) in &bundle.raw_counts {
        println!("✓ {} - {} rows", kind.name(), count);
    }
    for failure in &bundle.failures {
        eprintln!("✗ {} failed: {}", failure.kind.name(), failure.reason);
    }
    for (kind, report) in &bundle.key_reports {
        if report.unresolved_count() > 0 {
            println!(
                "⚠ {} - {} unresolved country name(s): {}",
                kind.name(),
                report.unresolved_count(),
                report.unresolved.join(", ")
            );
        }
    }

    if bundle.raw_counts.is_empty() {
        return Err(anyhow!("no source loaded from {}", data_dir.display()));
    }

    // 2. Year range: explicit argument or the case series' full span
    let years = match positional.get(2) {
        Some(range) => parse_year_range(range)?,
        None => {
            let (start, end) = bundle
                .case_year_span()
                .ok_or_else(|| anyhow!("no case series loaded and no year range given"))?;
            DateRange::new(start, end)?
        }
    };

    // 3. Run one request-scoped pass
    println!(
        "\n🔎 Filtering {} | {}-{}",
        countries.join(", "),
        years.start_year(),
        years.end_year()
    );
    let request = DashboardRequest::new(countries, years).with_focus("Mexico");
    let tables = request.run(&bundle)?;

    if !tables.unresolved_selections.is_empty() {
        println!(
            "⚠ Unrecognized selections skipped: {}",
            tables.unresolved_selections.join(", ")
        );
    }

    if json_only {
        println!(
            "{}",
            serde_json::to_string_pretty(&tables.to_json())
                .context("failed to serialize output tables")?
        );
        return Ok(());
    }

    // 4. Human summary
    println!("\n📊 Country Health Performance Indicators");
    for kpi in &tables.kpis {
        let cases = kpi
            .total_cases
            .as_f64()
            .map(|x| format!("{}", x as i64))
            .unwrap_or_else(|| "no data".to_string());
        let deaths = kpi
            .total_deaths
            .as_f64()
            .map(|x| format!("{}", x as i64))
            .unwrap_or_else(|| "no data".to_string());
        let cfr = kpi
            .fatality_rate
            .value()
            .map(|x| format!("{:.2}%", x))
            .unwrap_or_else(|| "undefined".to_string());
        println!(
            "  {} ({}) - cases: {}, deaths: {}, CFR: {}",
            kpi.display_name,
            kpi.code.as_str(),
            cases,
            deaths,
            cfr
        );
    }

    if let Some(series) = &tables.case_series {
        println!("\n📈 Daily case series: {} (country, date) points", series.len());
    }
    if let Some(series) = &tables.uptake_series {
        println!("💉 Vaccine dose series: {} (country, date) points", series.len());
    }
    if let Some(events) = &tables.policy_events {
        println!("📋 Policy events in range: {}", events.len());
    }
    if let Some(comparison) = &tables.comparison {
        println!(
            "\n🆚 {} vs {} ({}-{})",
            comparison.focus.display_name,
            comparison.peer.display_name,
            comparison.start_year,
            comparison.end_year
        );
        for side in [&comparison.focus, &comparison.peer] {
            let doses = side
                .total_doses
                .as_f64()
                .map(|x| format!("{}", x as i64))
                .unwrap_or_else(|| "no data".to_string());
            println!("  {} administered {} first doses", side.display_name, doses);
        }
    }

    println!("\n✅ Done");
    Ok(())
}

/// "2021-2023" → inclusive DateRange.
fn parse_year_range(raw: &str) -> Result<DateRange> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| anyhow!("year range must look like 2021-2023, got {:?}", raw))?;
    DateRange::new(
        start.trim().parse().context("bad start year")?,
        end.trim().parse().context("bad end year")?,
    )
}
