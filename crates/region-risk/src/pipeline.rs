//! Pipeline driver
//!
//! Owns the run inputs and the typed [`PipelineState`]. Stage methods take
//! the current state by value, compute the next one, and store it only once
//! the stage has finished; a rejected stage hands the previous state back
//! untouched.

use crate::aggregate::RegionCounts;
use crate::config::PipelineConfig;
use crate::filter::filter_incidents;
use crate::index::FinalTable;
use crate::matcher::match_incidents;
use crate::merge::preprocess_indicators;
use crate::stage::{Matched, OrderingError, PipelineState, Stage};
use crate::{
    IncidentRecord, IndicatorRecord, PipelineError, PopulationRecord, RegionPolygon, Result,
};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

/// Incident rows handed to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentInput {
    /// Raw archive rows; the match stage filters and matches them
    Raw(Vec<IncidentRecord>),
    /// Previously filtered and matched rows; the match stage adopts them
    Cached(Vec<IncidentRecord>),
}

impl IncidentInput {
    fn rows(&self) -> &[IncidentRecord] {
        match self {
            Self::Raw(rows) | Self::Cached(rows) => rows,
        }
    }
}

/// Incident totals of the current match output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MatchSummary {
    pub input: usize,
    pub filtered: usize,
    pub matched: usize,
    pub unmatched: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    incidents: IncidentInput,
    polygons: Vec<RegionPolygon>,
    population: Vec<PopulationRecord>,
    state: PipelineState,
}

impl Pipeline {
    /// Validate every input before any stage can run
    pub fn new(
        config: PipelineConfig,
        incidents: IncidentInput,
        polygons: Vec<RegionPolygon>,
        population: Vec<PopulationRecord>,
    ) -> Result<Self> {
        config.validate()?;

        if polygons.is_empty() {
            return Err(PipelineError::Validation(
                "at least one region polygon is required".to_string(),
            ));
        }

        let mut names = HashSet::with_capacity(polygons.len());
        for polygon in &polygons {
            if !names.insert(polygon.name.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "duplicate region polygon name {:?}",
                    polygon.name
                )));
            }
        }

        for (i, incident) in incidents.rows().iter().enumerate() {
            if !incident.location.x.is_finite() || !incident.location.y.is_finite() {
                return Err(PipelineError::Validation(format!(
                    "incident {} has a non-finite location",
                    i
                )));
            }
        }

        if let IncidentInput::Cached(rows) = &incidents {
            if let Some(unknown) = rows
                .iter()
                .filter_map(|i| i.region.as_deref())
                .find(|region| !names.contains(region))
            {
                return Err(PipelineError::Validation(format!(
                    "cached incident assigned to unknown region {:?}",
                    unknown
                )));
            }
        }

        if let Some(bad) = population
            .iter()
            .find(|p| !p.population.is_finite() || p.population < 0.0)
        {
            return Err(PipelineError::Validation(format!(
                "population of {:?} must be a finite non-negative number, got {}",
                bad.region, bad.population
            )));
        }

        info!(
            "Pipeline ready: {} incidents, {} regions, {} population rows",
            incidents.rows().len(),
            polygons.len(),
            population.len()
        );

        Ok(Self {
            config,
            incidents,
            polygons,
            population,
            state: PipelineState::Constructed,
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn counts(&self) -> Option<&RegionCounts> {
        self.state.aggregated().map(|a| &a.counts)
    }

    pub fn table(&self) -> Option<&FinalTable> {
        self.state.table()
    }

    fn reject(&self, attempted: Stage) -> OrderingError {
        let err = OrderingError::new(attempted);
        warn!(
            "Stage '{}' rejected, last completed stage: {:?}",
            attempted,
            self.state.completed_stage()
        );
        err
    }

    /// Filter and match the incidents. Always permitted; discards any later
    /// stage output.
    pub fn run_match(&mut self) -> MatchSummary {
        let incidents = match &self.incidents {
            IncidentInput::Raw(rows) => {
                let filtered = filter_incidents(rows.clone(), &self.config.filter);
                match_incidents(filtered, &self.polygons)
            }
            IncidentInput::Cached(rows) => {
                info!("Reusing {} cached matched incidents", rows.len());
                rows.clone()
            }
        };

        self.state = PipelineState::Matched(Matched { incidents });
        self.summary()
    }

    /// Count matched incidents per region
    pub fn run_aggregate(&mut self) -> std::result::Result<&RegionCounts, OrderingError> {
        let matched = match std::mem::take(&mut self.state).into_matched() {
            Ok(matched) => matched,
            Err(previous) => {
                self.state = previous;
                return Err(self.reject(Stage::Aggregate));
            }
        };

        self.state = PipelineState::Aggregated(matched.aggregate());
        self.counts().ok_or_else(|| OrderingError::new(Stage::Aggregate))
    }

    /// Normalise indicator region names ahead of the merge
    pub fn run_preprocess(
        &mut self,
        indicators: Vec<IndicatorRecord>,
    ) -> std::result::Result<&[IndicatorRecord], OrderingError> {
        let aggregated = match std::mem::take(&mut self.state).into_aggregated() {
            Ok(aggregated) => aggregated,
            Err(previous) => {
                self.state = previous;
                return Err(self.reject(Stage::Preprocess));
            }
        };

        let indicators = preprocess_indicators(indicators, &self.config.name_aliases);
        self.state = PipelineState::Preprocessed(aggregated.with_indicators(indicators));
        self.state
            .preprocessed()
            .map(|p| p.indicators.as_slice())
            .ok_or_else(|| OrderingError::new(Stage::Preprocess))
    }

    /// Merge all tables and compute per-capita rate and risk index
    pub fn run_merge(&mut self) -> std::result::Result<&FinalTable, OrderingError> {
        let preprocessed = match std::mem::take(&mut self.state).into_preprocessed() {
            Ok(preprocessed) => preprocessed,
            Err(previous) => {
                self.state = previous;
                return Err(self.reject(Stage::Merge));
            }
        };

        self.state = PipelineState::Completed(preprocessed.merge(&self.polygons, &self.population));
        self.table().ok_or_else(|| OrderingError::new(Stage::Merge))
    }

    /// Run all four stages in order
    pub fn run_all(&mut self, indicators: Vec<IndicatorRecord>) -> Result<&FinalTable> {
        self.run_match();
        self.run_aggregate()?;
        self.run_preprocess(indicators)?;
        Ok(self.run_merge()?)
    }

    /// Incident totals of the current match output (zeros before matching)
    pub fn summary(&self) -> MatchSummary {
        let input = self.incidents.rows().len();
        match self.state.matched() {
            Some(matched) => {
                let filtered = matched.incidents.len();
                let assigned = matched.incidents.iter().filter(|i| i.is_matched()).count();
                MatchSummary {
                    input,
                    filtered,
                    matched: assigned,
                    unmatched: filtered - assigned,
                }
            }
            None => MatchSummary {
                input,
                ..Default::default()
            },
        }
    }
}
