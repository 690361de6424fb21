//! Pipeline configuration
//!
//! Every field has a default matching the published Czech datasets, so an
//! empty JSON object (or no config file at all) yields a working setup.

use crate::{IndicatorField, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::info;

/// Relevance codes kept by the incident filter
pub const DEFAULT_RELEVANCE: [i32; 2] = [3, 4];

/// State codes kept by the incident filter
pub const DEFAULT_STATES: [i32; 4] = [1, 2, 3, 4];

/// Inclusive range of incident type codes kept by the filter
pub const DEFAULT_TYPE_MIN: i32 = 18;
pub const DEFAULT_TYPE_MAX: i32 = 62;

/// Short capital-city name used by the indicator table
pub const CAPITAL_SHORT_NAME: &str = "Praha";
/// Canonical capital-city name used by the polygon set
pub const CAPITAL_CANONICAL_NAME: &str = "Hlavní město Praha";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: FilterCriteria,
    /// Substitutions applied to indicator region names before the join
    pub name_aliases: Vec<NameAlias>,
    /// GeoJSON feature property that holds the region name
    pub polygon_name_property: String,
    pub indicator_columns: IndicatorColumns,
    pub population_columns: PopulationColumns,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: FilterCriteria::default(),
            name_aliases: vec![NameAlias {
                from: CAPITAL_SHORT_NAME.to_string(),
                to: CAPITAL_CANONICAL_NAME.to_string(),
            }],
            polygon_name_property: "NAZEV".to_string(),
            indicator_columns: IndicatorColumns::default(),
            population_columns: PopulationColumns::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading pipeline config from {:?}", path);

        if !path.exists() {
            return Err(PipelineError::MissingResource {
                resource: "pipeline config".to_string(),
                path: path.to_path_buf(),
            });
        }

        let reader = BufReader::new(File::open(path)?);
        let config: PipelineConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;

        for alias in &self.name_aliases {
            if alias.from.trim().is_empty() || alias.to.trim().is_empty() {
                return Err(PipelineError::Validation(format!(
                    "name alias has an empty side: {:?} -> {:?}",
                    alias.from, alias.to
                )));
            }
        }

        if self.polygon_name_property.trim().is_empty() {
            return Err(PipelineError::Validation(
                "polygon_name_property must not be empty".to_string(),
            ));
        }

        let mut columns = vec![
            ("indicator region", self.indicator_columns.region.as_str()),
            ("population region", self.population_columns.region.as_str()),
            ("population count", self.population_columns.population.as_str()),
        ];
        for field in IndicatorField::ALL {
            columns.push((field.key(), self.indicator_columns.column(field)));
        }
        for (what, column) in columns {
            if column.trim().is_empty() {
                return Err(PipelineError::Validation(format!(
                    "{} column name must not be empty",
                    what
                )));
            }
        }

        Ok(())
    }
}

/// Which raw incident rows are relevant for the analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub relevance: Vec<i32>,
    pub states: Vec<i32>,
    pub type_min: i32,
    pub type_max: i32,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            relevance: DEFAULT_RELEVANCE.to_vec(),
            states: DEFAULT_STATES.to_vec(),
            type_min: DEFAULT_TYPE_MIN,
            type_max: DEFAULT_TYPE_MAX,
        }
    }
}

impl FilterCriteria {
    pub fn type_range(&self) -> RangeInclusive<i32> {
        self.type_min..=self.type_max
    }

    pub fn validate(&self) -> Result<()> {
        if self.relevance.is_empty() {
            return Err(PipelineError::Validation(
                "filter.relevance must list at least one code".to_string(),
            ));
        }
        if self.states.is_empty() {
            return Err(PipelineError::Validation(
                "filter.states must list at least one code".to_string(),
            ));
        }
        if self.type_min > self.type_max {
            return Err(PipelineError::Validation(format!(
                "filter type range is inverted: {}..={}",
                self.type_min, self.type_max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAlias {
    pub from: String,
    pub to: String,
}

/// Header names of the indicator CSV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorColumns {
    pub region: String,
    pub foreclosure: String,
    pub no_high_school: String,
    pub benefits: String,
    pub dropout: String,
}

impl Default for IndicatorColumns {
    fn default() -> Self {
        Self {
            region: "Název ORP".to_string(),
            foreclosure: "Lidé v exekuci (2021) [%]".to_string(),
            no_high_school: "Podíl lidí bez středního vzdělání (2021) [%]".to_string(),
            benefits: "Domácnosti čerpající přídavek na živobytí (2020) [%]".to_string(),
            dropout: "Propadání (průměr 2015–2021) [%]".to_string(),
        }
    }
}

impl IndicatorColumns {
    pub fn column(&self, field: IndicatorField) -> &str {
        match field {
            IndicatorField::Foreclosure => &self.foreclosure,
            IndicatorField::NoHighSchool => &self.no_high_school,
            IndicatorField::Benefits => &self.benefits,
            IndicatorField::Dropout => &self.dropout,
        }
    }
}

/// Header names of the population CSV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationColumns {
    pub region: String,
    pub population: String,
}

impl Default for PopulationColumns {
    fn default() -> Self {
        Self {
            region: "Kraje / SO ORP".to_string(),
            population: "Počet obyvatel celkem".to_string(),
        }
    }
}
