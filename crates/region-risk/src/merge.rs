//! Dataset merger
//!
//! Left-joins counts, indicators and population onto the polygon set by
//! region name, in that order. Every polygon yields exactly one row; keys
//! absent from a right-hand table are zero-filled.
//!
//! A zero-filled field is indistinguishable from a genuine zero. Missing
//! keys are logged at `warn` so a run can be audited.

use crate::aggregate::RegionCounts;
use crate::config::NameAlias;
use crate::{IndicatorRecord, IndicatorValues, PopulationRecord, RegionPolygon};
use geo::MultiPolygon;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Polygon row after the three joins
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    pub count: u64,
    pub indicators: IndicatorValues,
    pub population: f64,
}

/// Apply name aliases to indicator region names (exact match only)
pub fn preprocess_indicators(
    mut records: Vec<IndicatorRecord>,
    aliases: &[NameAlias],
) -> Vec<IndicatorRecord> {
    let mut renamed = 0;

    for record in records.iter_mut() {
        if let Some(alias) = aliases.iter().find(|a| a.from == record.region) {
            debug!("Renaming indicator region {:?} -> {:?}", alias.from, alias.to);
            record.region = alias.to.clone();
            renamed += 1;
        }
    }

    info!(
        "Preprocessed {} indicator rows ({} renamed)",
        records.len(),
        renamed
    );

    records
}

/// Index a right-hand table by region name; the first row for a name wins
fn index_by_name<'a, T>(
    rows: &'a [T],
    table: &str,
    name_of: impl Fn(&T) -> &str,
) -> HashMap<&'a str, &'a T> {
    let mut index: HashMap<&str, &T> = HashMap::with_capacity(rows.len());
    for row in rows {
        let name = name_of(row);
        if index.contains_key(name) {
            warn!("Duplicate {} row for region {:?}, keeping the first", table, name);
            continue;
        }
        index.insert(name, row);
    }
    index
}

/// Merge counts, indicators and population onto the polygon set
pub fn merge_datasets(
    polygons: &[RegionPolygon],
    counts: &RegionCounts,
    indicators: &[IndicatorRecord],
    population: &[PopulationRecord],
) -> Vec<MergedRow> {
    let indicator_index = index_by_name(indicators, "indicator", |r| r.region.as_str());
    let population_index = index_by_name(population, "population", |r| r.region.as_str());

    let mut missing_indicators = 0;
    let mut missing_population = 0;

    let rows: Vec<MergedRow> = polygons
        .iter()
        .map(|polygon| {
            let name = polygon.name.as_str();

            let count = counts.get(name).unwrap_or(0);

            let indicators = match indicator_index.get(name) {
                Some(record) => IndicatorValues::from_record(record),
                None => {
                    warn!("No indicator row for region {:?}, zero-filling", name);
                    missing_indicators += 1;
                    IndicatorValues::default()
                }
            };

            let population = match population_index.get(name) {
                Some(record) => record.population,
                None => {
                    warn!("No population row for region {:?}, zero-filling", name);
                    missing_population += 1;
                    0.0
                }
            };

            MergedRow {
                name: polygon.name.clone(),
                geometry: polygon.boundary.clone(),
                count,
                indicators,
                population,
            }
        })
        .collect();

    info!(
        "Merged {} regions ({} without indicators, {} without population)",
        rows.len(),
        missing_indicators,
        missing_population
    );

    rows
}
