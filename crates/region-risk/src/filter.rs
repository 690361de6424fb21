//! Incident filter
//!
//! Keeps the rows relevant for the analysis: relevance in the configured set,
//! state in the configured set, type code within the inclusive range.

use crate::config::FilterCriteria;
use crate::IncidentRecord;
use tracing::info;

/// Whether a single incident passes the criteria
pub fn is_relevant(incident: &IncidentRecord, criteria: &FilterCriteria) -> bool {
    criteria.relevance.contains(&incident.relevance)
        && criteria.states.contains(&incident.state)
        && criteria.type_range().contains(&incident.type_code)
}

/// Filter raw incidents, preserving their order
pub fn filter_incidents(
    incidents: Vec<IncidentRecord>,
    criteria: &FilterCriteria,
) -> Vec<IncidentRecord> {
    let total = incidents.len();
    let kept: Vec<IncidentRecord> = incidents
        .into_iter()
        .filter(|i| is_relevant(i, criteria))
        .collect();

    info!(
        "Filtered incidents: {} of {} kept ({} dropped)",
        kept.len(),
        total,
        total - kept.len()
    );

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn incident(relevance: i32, state: i32, type_code: i32) -> IncidentRecord {
        IncidentRecord::new(14.0, 50.0, relevance, state, type_code)
    }

    #[test]
    fn test_boundaries() {
        let criteria = FilterCriteria::default();
        assert!(is_relevant(&incident(3, 1, 18), &criteria));
        assert!(is_relevant(&incident(4, 4, 62), &criteria));
        assert!(!is_relevant(&incident(2, 1, 20), &criteria));
        assert!(!is_relevant(&incident(5, 1, 20), &criteria));
        assert!(!is_relevant(&incident(3, 0, 20), &criteria));
        assert!(!is_relevant(&incident(3, 5, 20), &criteria));
        assert!(!is_relevant(&incident(3, 1, 17), &criteria));
        assert!(!is_relevant(&incident(3, 1, 63), &criteria));
    }

    #[test]
    fn test_filter_keeps_order() {
        let rows = vec![
            IncidentRecord::new(1.0, 1.0, 3, 1, 20),
            IncidentRecord::new(2.0, 2.0, 1, 1, 20),
            IncidentRecord::new(3.0, 3.0, 4, 2, 40),
        ];
        let kept = filter_incidents(rows, &FilterCriteria::default());
        let xs: Vec<f64> = kept.iter().map(|i| i.location.x).collect();
        assert_eq!(xs, vec![1.0, 3.0]);
    }

    proptest! {
        #[test]
        fn test_filter_postcondition(
            rows in prop::collection::vec((0i32..8, 0i32..8, 0i32..80), 0..64)
        ) {
            let incidents: Vec<IncidentRecord> = rows
                .iter()
                .map(|&(r, s, t)| incident(r, s, t))
                .collect();
            let kept = filter_incidents(incidents, &FilterCriteria::default());
            for i in &kept {
                prop_assert!(i.relevance == 3 || i.relevance == 4);
                prop_assert!((1..=4).contains(&i.state));
                prop_assert!((18..=62).contains(&i.type_code));
            }
            let expected = rows
                .iter()
                .filter(|&&(r, s, t)| (3..=4).contains(&r) && (1..=4).contains(&s) && (18..=62).contains(&t))
                .count();
            prop_assert_eq!(kept.len(), expected);
        }
    }
}
