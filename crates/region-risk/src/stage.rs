//! Stage guard
//!
//! The pipeline state is a typed value. Each stage consumes the previous
//! stage's output and returns the next state; a stage whose prerequisite is
//! missing yields an [`OrderingError`] instead.
//!
//! ```text
//! Constructed ──match──▶ Matched ──aggregate──▶ Aggregated
//!     ──preprocess──▶ Preprocessed ──merge──▶ Completed
//! ```
//!
//! Re-running an earlier stage is always allowed and drops every later
//! result, which keeps counts consistent with the current assignments.

use crate::aggregate::{aggregate_counts, RegionCounts};
use crate::index::{compute_index, FinalTable};
use crate::merge::merge_datasets;
use crate::{IncidentRecord, IndicatorRecord, PopulationRecord, RegionPolygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Match,
    Aggregate,
    Preprocess,
    Merge,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [Stage::Match, Stage::Aggregate, Stage::Preprocess, Stage::Merge];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match => "match",
            Stage::Aggregate => "aggregate",
            Stage::Preprocess => "preprocess",
            Stage::Merge => "merge",
        }
    }

    /// Stage whose output this one consumes
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::Match => None,
            Stage::Aggregate => Some(Stage::Match),
            Stage::Preprocess => Some(Stage::Aggregate),
            Stage::Merge => Some(Stage::Preprocess),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage was invoked before its prerequisite completed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{attempted}' was called out of order. Expected order: {}", format_order(.expected))]
pub struct OrderingError {
    pub attempted: Stage,
    pub expected: [Stage; 4],
}

impl OrderingError {
    pub fn new(attempted: Stage) -> Self {
        Self {
            attempted,
            expected: Stage::ORDER,
        }
    }

    /// Stage names of the expected order
    pub fn expected_names(&self) -> Vec<&'static str> {
        self.expected.iter().map(Stage::name).collect()
    }
}

fn format_order(order: &[Stage; 4]) -> String {
    let names: Vec<String> = order.iter().map(|s| format!("'{}'", s.name())).collect();
    format!("[{}]", names.join(", "))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    pub incidents: Vec<IncidentRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    pub matched: Matched,
    pub counts: RegionCounts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub aggregated: Aggregated,
    pub indicators: Vec<IndicatorRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub preprocessed: Preprocessed,
    pub table: FinalTable,
}

impl Matched {
    pub fn aggregate(self) -> Aggregated {
        let counts = aggregate_counts(&self.incidents);
        Aggregated {
            matched: self,
            counts,
        }
    }
}

impl Aggregated {
    /// `indicators` must already be name-normalised
    pub fn with_indicators(self, indicators: Vec<IndicatorRecord>) -> Preprocessed {
        Preprocessed {
            aggregated: self,
            indicators,
        }
    }
}

impl Preprocessed {
    pub fn merge(self, polygons: &[RegionPolygon], population: &[PopulationRecord]) -> Completed {
        let merged = merge_datasets(
            polygons,
            &self.aggregated.counts,
            &self.indicators,
            population,
        );
        let table = compute_index(merged);
        Completed {
            preprocessed: self,
            table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum PipelineState {
    #[default]
    Constructed,
    Matched(Matched),
    Aggregated(Aggregated),
    Preprocessed(Preprocessed),
    Completed(Completed),
}

impl PipelineState {
    /// Last stage whose output is present
    pub fn completed_stage(&self) -> Option<Stage> {
        match self {
            Self::Constructed => None,
            Self::Matched(_) => Some(Stage::Match),
            Self::Aggregated(_) => Some(Stage::Aggregate),
            Self::Preprocessed(_) => Some(Stage::Preprocess),
            Self::Completed(_) => Some(Stage::Merge),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn matched(&self) -> Option<&Matched> {
        match self {
            Self::Constructed => None,
            Self::Matched(m) => Some(m),
            Self::Aggregated(a) => Some(&a.matched),
            Self::Preprocessed(p) => Some(&p.aggregated.matched),
            Self::Completed(c) => Some(&c.preprocessed.aggregated.matched),
        }
    }

    pub fn aggregated(&self) -> Option<&Aggregated> {
        match self {
            Self::Aggregated(a) => Some(a),
            Self::Preprocessed(p) => Some(&p.aggregated),
            Self::Completed(c) => Some(&c.preprocessed.aggregated),
            _ => None,
        }
    }

    pub fn preprocessed(&self) -> Option<&Preprocessed> {
        match self {
            Self::Preprocessed(p) => Some(p),
            Self::Completed(c) => Some(&c.preprocessed),
            _ => None,
        }
    }

    pub fn table(&self) -> Option<&FinalTable> {
        match self {
            Self::Completed(c) => Some(&c.table),
            _ => None,
        }
    }

    /// Unwind to the match output; the state is handed back on failure
    pub fn into_matched(self) -> Result<Matched, PipelineState> {
        match self {
            Self::Matched(m) => Ok(m),
            Self::Aggregated(a) => Ok(a.matched),
            Self::Preprocessed(p) => Ok(p.aggregated.matched),
            Self::Completed(c) => Ok(c.preprocessed.aggregated.matched),
            other => Err(other),
        }
    }

    pub fn into_aggregated(self) -> Result<Aggregated, PipelineState> {
        match self {
            Self::Aggregated(a) => Ok(a),
            Self::Preprocessed(p) => Ok(p.aggregated),
            Self::Completed(c) => Ok(c.preprocessed.aggregated),
            other => Err(other),
        }
    }

    pub fn into_preprocessed(self) -> Result<Preprocessed, PipelineState> {
        match self {
            Self::Preprocessed(p) => Ok(p),
            Self::Completed(c) => Ok(c.preprocessed),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched() -> Matched {
        let mut incident = IncidentRecord::new(0.5, 0.5, 3, 1, 20);
        incident.region = Some("A".to_string());
        Matched {
            incidents: vec![incident],
        }
    }

    #[test]
    fn test_ordering_error_message() {
        let err = OrderingError::new(Stage::Aggregate);
        assert_eq!(
            err.to_string(),
            "'aggregate' was called out of order. Expected order: ['match', 'aggregate', 'preprocess', 'merge']"
        );
        assert_eq!(err.expected_names(), vec!["match", "aggregate", "preprocess", "merge"]);
    }

    #[test]
    fn test_prerequisites_follow_order() {
        assert_eq!(Stage::Match.prerequisite(), None);
        for pair in Stage::ORDER.windows(2) {
            assert_eq!(pair[1].prerequisite(), Some(pair[0]));
        }
    }

    #[test]
    fn test_constructed_has_no_outputs() {
        let state = PipelineState::default();
        assert_eq!(state.completed_stage(), None);
        assert!(state.matched().is_none());
        assert!(matches!(state.into_matched(), Err(PipelineState::Constructed)));
    }

    #[test]
    fn test_unwinding_keeps_earlier_outputs() {
        let aggregated = matched().aggregate();
        assert_eq!(aggregated.counts.get("A"), Some(1));

        let preprocessed = aggregated.with_indicators(vec![]);
        let state = PipelineState::Preprocessed(preprocessed);
        assert_eq!(state.completed_stage(), Some(Stage::Preprocess));
        assert!(state.aggregated().is_some());
        assert!(state.table().is_none());

        let back = state.into_matched().unwrap();
        assert_eq!(back, matched());
    }

    #[test]
    fn test_into_aggregated_rejects_matched() {
        let state = PipelineState::Matched(matched());
        let returned = state.into_aggregated().unwrap_err();
        assert_eq!(returned.completed_stage(), Some(Stage::Match));
    }
}
