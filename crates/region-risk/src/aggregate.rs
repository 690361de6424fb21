//! Region aggregator: incident counts per matched region

use crate::IncidentRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Counts derived from matched incidents. Regions without incidents and
/// unmatched incidents have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionCounts {
    counts: BTreeMap<String, u64>,
    /// Filtered incidents that fell outside every region
    unmatched: u64,
}

impl RegionCounts {
    pub fn get(&self, region: &str) -> Option<u64> {
        self.counts.get(region).copied()
    }

    /// Number of regions with at least one incident
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum over all regions
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn unmatched(&self) -> u64 {
        self.unmatched
    }
}

/// Count incidents per assigned region
pub fn aggregate_counts(incidents: &[IncidentRecord]) -> RegionCounts {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut unmatched = 0;

    for incident in incidents {
        match &incident.region {
            Some(region) => *counts.entry(region.clone()).or_default() += 1,
            None => unmatched += 1,
        }
    }

    let result = RegionCounts { counts, unmatched };

    info!(
        "Aggregated {} incidents into {} regions ({} unmatched)",
        result.total(),
        result.len(),
        unmatched
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assigned(region: Option<&str>) -> IncidentRecord {
        let mut incident = IncidentRecord::new(0.0, 0.0, 3, 1, 20);
        incident.region = region.map(str::to_string);
        incident
    }

    #[test]
    fn test_counts_per_region() {
        let incidents = vec![
            assigned(Some("A")),
            assigned(Some("B")),
            assigned(Some("A")),
            assigned(None),
        ];
        let counts = aggregate_counts(&incidents);
        assert_eq!(counts.get("A"), Some(2));
        assert_eq!(counts.get("B"), Some(1));
        assert_eq!(counts.get("C"), None);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.unmatched(), 1);
    }

    #[test]
    fn test_empty_input() {
        let counts = aggregate_counts(&[]);
        assert!(counts.is_empty());
        assert_eq!(counts.total(), 0);
    }

    proptest! {
        #[test]
        fn test_counts_conserve_incidents(
            regions in prop::collection::vec(prop::option::of(0u8..5), 0..100)
        ) {
            let incidents: Vec<IncidentRecord> = regions
                .iter()
                .map(|r| assigned(r.map(|i| format!("R{}", i)).as_deref()))
                .collect();
            let counts = aggregate_counts(&incidents);
            let unassigned = regions.iter().filter(|r| r.is_none()).count() as u64;

            prop_assert!(counts.total() <= incidents.len() as u64);
            prop_assert_eq!(counts.total() + unassigned, incidents.len() as u64);
            prop_assert_eq!(counts.total() == incidents.len() as u64, unassigned == 0);
        }
    }
}
