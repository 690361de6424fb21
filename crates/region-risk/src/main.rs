//! Region Risk CLI
//!
//! Matches police incidents to ORP regions and scores every region with a
//! correlation-weighted risk index.
//!
//! Usage:
//!   region-risk --polygons data/orp.geojson \
//!               --indicators data/indicators.csv \
//!               --population data/population.csv \
//!               --incidents-dir data/incidents --year 2021 \
//!               --output data/region_risk.json --geojson

use anyhow::{bail, Context, Result};
use clap::Parser;
use region_risk::export::{to_geojson, write_json, RunReport};
use region_risk::loader::{
    load_indicators, load_matched_cache, load_polygons, load_population, write_matched_cache,
};
use region_risk::source::collect_incidents;
use region_risk::{
    DirectorySource, IncidentInput, IncidentPeriod, IndicatorField, Pipeline, PipelineConfig,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "region-risk",
    about = "Per-region incident rate and socioeconomic risk index"
)]
struct Args {
    /// Pipeline config JSON; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Region polygons GeoJSON
    #[arg(short = 'p', long)]
    polygons: PathBuf,

    /// Socioeconomic indicator CSV
    #[arg(short = 'i', long)]
    indicators: PathBuf,

    /// Population CSV
    #[arg(long)]
    population: PathBuf,

    /// Directory of monthly incident tables named YYYYMM.csv
    #[arg(long)]
    incidents_dir: Option<PathBuf>,

    /// Archive month (YYYY-MM), repeatable
    #[arg(long = "period")]
    periods: Vec<String>,

    /// Every month of a year, repeatable
    #[arg(long = "year")]
    years: Vec<i32>,

    /// Matched incident cache CSV
    #[arg(long)]
    matched_cache: Option<PathBuf>,

    /// Load matched incidents from the cache instead of matching
    #[arg(long)]
    reuse_matched: bool,

    /// Write matched incidents to the cache after matching
    #[arg(long)]
    write_cache: bool,

    /// Output JSON report
    #[arg(short, long, default_value = "region_risk.json")]
    output: PathBuf,

    /// Also output GeoJSON
    #[arg(long)]
    geojson: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn requested_periods(args: &Args) -> Result<Vec<IncidentPeriod>> {
    let mut periods = Vec::new();
    for &year in &args.years {
        periods.extend(IncidentPeriod::months_of(year)?);
    }
    for raw in &args.periods {
        periods.push(raw.parse::<IncidentPeriod>()?);
    }
    if periods.is_empty() {
        bail!("no incident period requested, use --period or --year");
    }
    periods.sort();
    periods.dedup();
    Ok(periods)
}

fn check_cache_flags(args: &Args) -> Result<()> {
    if args.write_cache && args.matched_cache.is_none() {
        bail!("--write-cache requires --matched-cache");
    }
    if args.write_cache && args.reuse_matched {
        bail!("--write-cache cannot be combined with --reuse-matched");
    }
    Ok(())
}

fn incident_input(args: &Args) -> Result<IncidentInput> {
    if args.reuse_matched {
        let path = args
            .matched_cache
            .as_ref()
            .context("--reuse-matched requires --matched-cache")?;
        return Ok(IncidentInput::Cached(load_matched_cache(path)?));
    }

    let dir = args
        .incidents_dir
        .as_ref()
        .context("--incidents-dir is required unless --reuse-matched is set")?;
    let periods = requested_periods(args)?;
    let source = DirectorySource::new(dir);
    Ok(IncidentInput::Raw(collect_incidents(&source, &periods)?))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "region_risk=debug"
    } else {
        "region_risk=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("{}", "=".repeat(60));
    info!("Region Risk Pipeline");
    info!("{}", "=".repeat(60));

    check_cache_flags(&args)?;

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    let polygons = load_polygons(&args.polygons, &config.polygon_name_property)?;
    let indicators = load_indicators(&args.indicators, &config.indicator_columns)?;
    let population = load_population(&args.population, &config.population_columns)?;
    let incidents = incident_input(&args)?;

    let mut pipeline = Pipeline::new(config, incidents, polygons, population)?;

    let summary = pipeline.run_match();
    if args.write_cache {
        if let (Some(path), Some(matched)) = (&args.matched_cache, pipeline.state().matched()) {
            write_matched_cache(path, &matched.incidents)?;
        }
    }

    pipeline.run_aggregate()?;
    pipeline.run_preprocess(indicators)?;
    let table = pipeline.run_merge()?;

    let report = RunReport::new(table, summary);
    write_json(&args.output, &report)?;

    if args.geojson {
        let geojson_path = args.output.with_extension("geojson");
        write_json(&geojson_path, &to_geojson(table, &report.metadata))?;
    }

    // Summary
    info!("{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Regions: {}", report.metadata.regions);
    info!(
        "Incidents: {} total, {} relevant, {} matched, {} outside every region",
        summary.input, summary.filtered, summary.matched, summary.unmatched
    );
    info!("Risk weights:");
    for field in IndicatorField::ALL {
        info!("  {:>16}: {:.3}", field.key(), table.weights.weight(field));
    }
    info!("Correlation with per-capita rate:");
    for entry in &report.metadata.correlations {
        info!("  {:>16}: {:.3}", entry.indicator.key(), entry.correlation);
    }

    let mut ranked: Vec<_> = table.rows.iter().collect();
    ranked.sort_by(|a, b| b.risk_index.total_cmp(&a.risk_index));
    info!("Top 10 regions by risk index:");
    for row in ranked.iter().take(10) {
        info!(
            "  {:8.3} | {:30} | {:6} incidents | {:.6} per capita",
            row.risk_index, row.name, row.count, row.per_capita
        );
    }

    Ok(())
}
