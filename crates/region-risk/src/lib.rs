//! Region Risk Pipeline
//!
//! Assigns geolocated incidents to ORP region polygons, counts them per
//! region, merges the counts with socioeconomic indicator and population
//! tables, and derives a per-capita rate plus a correlation-weighted
//! risk index.
//!
//! # Stage Order
//!
//! ```text
//! raw incidents → filter → match → aggregate → preprocess → merge/compute
//! ```
//!
//! # Risk Index
//!
//! ```text
//! Risk(r) = w₁·F + w₂·H + w₃·B + w₄·D      wᵢ = corr(per_capita, indicatorᵢ)
//! ```
//!
//! | Field | Description |
//! |-------|-------------|
//! | F     | People in foreclosure [%] |
//! | H     | Share of people without completed secondary education [%] |
//! | B     | Households drawing subsistence benefits [%] |
//! | D     | Multi-year dropout rate [%] |
//!
//! The weight vector is always aligned with [`IndicatorField::ALL`]; weights
//! are looked up by field, never by column position.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub mod aggregate;
pub mod config;
pub mod export;
pub mod filter;
pub mod index;
pub mod loader;
pub mod matcher;
pub mod merge;
pub mod pipeline;
pub mod source;
pub mod stage;

pub use aggregate::RegionCounts;
pub use config::PipelineConfig;
pub use index::{FinalTable, RiskWeights};
pub use pipeline::{IncidentInput, Pipeline};
pub use source::{DirectorySource, IncidentPeriod, IncidentSource};
pub use stage::{OrderingError, Stage};

/// First year published by the police incident archive
pub const FIRST_ARCHIVE_YEAR: i32 = 2012;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error("Missing {resource}: {path:?} does not exist")]
    MissingResource { resource: String, path: PathBuf },
    #[error("Format error in {table}: {detail}")]
    Format { table: String, detail: String },
    #[error("No incident data available for {0}")]
    NoIncidentData(String),
    #[error("Incident data unavailable for {0}")]
    Unavailable(IncidentPeriod),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Planar incident location in the polygon coordinate reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

/// A single incident row from the police archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub location: Location,
    pub relevance: i32,
    pub state: i32,
    pub type_code: i32,
    /// Containing region, set once by the spatial matcher
    pub region: Option<String>,
}

impl IncidentRecord {
    pub fn new(x: f64, y: f64, relevance: i32, state: i32, type_code: i32) -> Self {
        Self {
            location: Location { x, y },
            relevance,
            state,
            type_code,
            region: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.region.is_some()
    }
}

/// Administrative region boundary. The name is the join key for every table.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPolygon {
    pub name: String,
    pub boundary: MultiPolygon<f64>,
}

impl RegionPolygon {
    pub fn new(name: impl Into<String>, boundary: impl Into<MultiPolygon<f64>>) -> Self {
        Self {
            name: name.into(),
            boundary: boundary.into(),
        }
    }
}

/// The four socioeconomic indicators, in weight order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorField {
    Foreclosure,
    NoHighSchool,
    Benefits,
    Dropout,
}

impl IndicatorField {
    /// Fixed alignment of indicator values and risk weights
    pub const ALL: [IndicatorField; 4] = [
        IndicatorField::Foreclosure,
        IndicatorField::NoHighSchool,
        IndicatorField::Benefits,
        IndicatorField::Dropout,
    ];

    /// Legend label used by renderers
    pub fn label(&self) -> &'static str {
        match self {
            Self::Foreclosure => "People in foreclosure (2021) [%]",
            Self::NoHighSchool => "Share of people without completed high school (2021) [%]",
            Self::Benefits => "Households on allowances (2020) [%]",
            Self::Dropout => "Dropout (average 2015-2021) [%]",
        }
    }

    /// Snake-case key used in JSON and GeoJSON properties
    pub fn key(&self) -> &'static str {
        match self {
            Self::Foreclosure => "foreclosure",
            Self::NoHighSchool => "no_high_school",
            Self::Benefits => "benefits",
            Self::Dropout => "dropout",
        }
    }
}

/// Indicator row as loaded. `None` marks an empty cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub region: String,
    pub foreclosure: Option<f64>,
    pub no_high_school: Option<f64>,
    pub benefits: Option<f64>,
    pub dropout: Option<f64>,
}

impl IndicatorRecord {
    pub fn value(&self, field: IndicatorField) -> Option<f64> {
        match field {
            IndicatorField::Foreclosure => self.foreclosure,
            IndicatorField::NoHighSchool => self.no_high_school,
            IndicatorField::Benefits => self.benefits,
            IndicatorField::Dropout => self.dropout,
        }
    }

    pub fn set(&mut self, field: IndicatorField, value: Option<f64>) {
        match field {
            IndicatorField::Foreclosure => self.foreclosure = value,
            IndicatorField::NoHighSchool => self.no_high_school = value,
            IndicatorField::Benefits => self.benefits = value,
            IndicatorField::Dropout => self.dropout = value,
        }
    }
}

/// Zero-filled indicator values of a merged row
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorValues {
    pub foreclosure: f64,
    pub no_high_school: f64,
    pub benefits: f64,
    pub dropout: f64,
}

impl IndicatorValues {
    pub fn get(&self, field: IndicatorField) -> f64 {
        match field {
            IndicatorField::Foreclosure => self.foreclosure,
            IndicatorField::NoHighSchool => self.no_high_school,
            IndicatorField::Benefits => self.benefits,
            IndicatorField::Dropout => self.dropout,
        }
    }

    /// Empty cells become zero
    pub fn from_record(record: &IndicatorRecord) -> Self {
        Self {
            foreclosure: record.foreclosure.unwrap_or(0.0),
            no_high_school: record.no_high_school.unwrap_or(0.0),
            benefits: record.benefits.unwrap_or(0.0),
            dropout: record.dropout.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRecord {
    pub region: String,
    pub population: f64,
}

/// One output row per region polygon
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalRow {
    pub name: String,
    #[serde(skip)]
    pub geometry: MultiPolygon<f64>,
    pub count: u64,
    pub population: f64,
    /// count / population, forced to 0 when population is 0
    pub per_capita: f64,
    pub indicators: IndicatorValues,
    pub risk_index: f64,
}
