//! Run report and GeoJSON export

use crate::index::{FinalTable, RiskWeights};
use crate::pipeline::MatchSummary;
use crate::{FinalRow, IndicatorField, Result};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationEntry {
    pub indicator: IndicatorField,
    /// `null` when undefined
    pub correlation: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub total_incidents: usize,
    pub filtered_incidents: usize,
    pub matched_incidents: usize,
    pub unmatched_incidents: usize,
    pub regions: usize,
    pub weights: RiskWeights,
    /// Per-capita correlations, ascending
    pub correlations: Vec<CorrelationEntry>,
    pub generated_at: String,
}

impl RunMetadata {
    pub fn new(summary: MatchSummary, table: &FinalTable) -> Self {
        Self {
            total_incidents: summary.input,
            filtered_incidents: summary.filtered,
            matched_incidents: summary.matched,
            unmatched_incidents: summary.unmatched,
            regions: table.rows.len(),
            weights: table.weights,
            correlations: table
                .per_capita_correlations()
                .into_iter()
                .map(|(indicator, correlation)| CorrelationEntry {
                    indicator,
                    correlation,
                })
                .collect(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub rows: &'a [FinalRow],
    pub metadata: RunMetadata,
}

impl<'a> RunReport<'a> {
    pub fn new(table: &'a FinalTable, summary: MatchSummary) -> Self {
        Self {
            rows: &table.rows,
            metadata: RunMetadata::new(summary, table),
        }
    }
}

/// Final table as a FeatureCollection, one MultiPolygon feature per region.
/// `legend` maps each indicator property to its display label.
pub fn to_geojson(table: &FinalTable, metadata: &RunMetadata) -> serde_json::Value {
    let features: Vec<serde_json::Value> = table
        .rows
        .iter()
        .map(|row| {
            let mut properties = serde_json::json!({
                "name": row.name,
                "count": row.count,
                "population": row.population,
                "per_capita": row.per_capita,
                "risk_index": row.risk_index
            });
            if let Some(map) = properties.as_object_mut() {
                for field in IndicatorField::ALL {
                    map.insert(field.key().to_string(), row.indicators.get(field).into());
                }
            }

            serde_json::json!({
                "type": "Feature",
                "geometry": geojson::Geometry::new(geojson::Value::from(&row.geometry)),
                "properties": properties
            })
        })
        .collect();

    let legend: serde_json::Map<String, serde_json::Value> = IndicatorField::ALL
        .iter()
        .map(|field| (field.key().to_string(), field.label().into()))
        .collect();

    serde_json::json!({
        "type": "FeatureCollection",
        "features": features,
        "legend": legend,
        "metadata": metadata
    })
}

/// Pretty-print any serializable value to `path`
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    info!("Writing {:?}", path);
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
