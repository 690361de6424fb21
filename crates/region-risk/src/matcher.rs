//! Spatial matcher
//!
//! Assigns every incident to the first region polygon, in the provided
//! order, whose interior contains the incident point. Bounding boxes go into
//! an R-tree; candidates returned by the tree are re-sorted by their position
//! in the polygon sequence before the exact containment test, so overlapping
//! polygons resolve exactly as a nested loop over the sequence would.

use crate::{IncidentRecord, Location, RegionPolygon};
use geo::{BoundingRect, Contains, Point};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use tracing::{debug, info};

type Envelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// R-tree over polygon bounding boxes, keyed by polygon position
pub struct RegionIndex<'a> {
    polygons: &'a [RegionPolygon],
    tree: RTree<Envelope>,
}

impl<'a> RegionIndex<'a> {
    pub fn new(polygons: &'a [RegionPolygon]) -> Self {
        let envelopes: Vec<Envelope> = polygons
            .iter()
            .enumerate()
            .filter_map(|(position, polygon)| {
                // Empty geometries have no bounding box and can never contain a point
                polygon.boundary.bounding_rect().map(|rect| {
                    GeomWithData::new(
                        Rectangle::from_corners(
                            [rect.min().x, rect.min().y],
                            [rect.max().x, rect.max().y],
                        ),
                        position,
                    )
                })
            })
            .collect();

        debug!("Indexed {} of {} region envelopes", envelopes.len(), polygons.len());

        Self {
            polygons,
            tree: RTree::bulk_load(envelopes),
        }
    }

    /// First polygon (by sequence position) containing the location
    pub fn locate(&self, location: Location) -> Option<&'a RegionPolygon> {
        if !location.x.is_finite() || !location.y.is_finite() {
            return None;
        }

        let point = Point::new(location.x, location.y);
        let mut positions: Vec<usize> = self
            .tree
            .locate_all_at_point(&[location.x, location.y])
            .map(|envelope| envelope.data)
            .collect();
        positions.sort_unstable();

        let polygons = self.polygons;
        positions
            .into_iter()
            .map(|position| &polygons[position])
            .find(|polygon| polygon.boundary.contains(&point))
    }
}

/// Assign regions to every incident. Any previous assignment is overwritten,
/// so re-running on the same input yields the same result.
pub fn match_incidents(
    mut incidents: Vec<IncidentRecord>,
    polygons: &[RegionPolygon],
) -> Vec<IncidentRecord> {
    let index = RegionIndex::new(polygons);
    let mut unmatched = 0;

    for incident in incidents.iter_mut() {
        incident.region = index.locate(incident.location).map(|p| p.name.clone());
        if incident.region.is_none() {
            unmatched += 1;
        }
    }

    info!(
        "Matched {} incidents against {} regions ({} outside every region)",
        incidents.len() - unmatched,
        polygons.len(),
        unmatched
    );

    incidents
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::{LineString, MultiPolygon, Polygon};
    use proptest::prelude::*;

    /// Nested-loop lookup over the polygon sequence
    fn locate_linear(polygons: &[RegionPolygon], location: Location) -> Option<&RegionPolygon> {
        let point = Point::new(location.x, location.y);
        polygons
            .iter()
            .find(|polygon| polygon.boundary.contains(&point))
    }

    pub(crate) fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (x0, y0),
                (x0 + size, y0),
                (x0 + size, y0 + size),
                (x0, y0 + size),
                (x0, y0),
            ]),
            vec![],
        )
    }

    fn at(x: f64, y: f64) -> Location {
        Location { x, y }
    }

    #[test]
    fn test_first_match_wins_on_overlap() {
        let polygons = vec![
            RegionPolygon::new("Outer", square(0.0, 0.0, 10.0)),
            RegionPolygon::new("Inner", square(2.0, 2.0, 2.0)),
        ];
        let index = RegionIndex::new(&polygons);
        assert_eq!(index.locate(at(3.0, 3.0)).map(|p| p.name.as_str()), Some("Outer"));

        let reversed: Vec<RegionPolygon> = polygons.iter().rev().cloned().collect();
        let index = RegionIndex::new(&reversed);
        assert_eq!(index.locate(at(3.0, 3.0)).map(|p| p.name.as_str()), Some("Inner"));
    }

    #[test]
    fn test_boundary_and_outside_points_unmatched() {
        let polygons = vec![RegionPolygon::new("A", square(0.0, 0.0, 1.0))];
        let index = RegionIndex::new(&polygons);
        assert!(index.locate(at(0.0, 0.5)).is_none());
        assert!(index.locate(at(5.0, 5.0)).is_none());
        assert!(index.locate(at(f64::NAN, 0.5)).is_none());
    }

    #[test]
    fn test_hole_is_not_contained() {
        let donut = Polygon::new(
            square(0.0, 0.0, 10.0).exterior().clone(),
            vec![square(4.0, 4.0, 2.0).exterior().clone()],
        );
        let polygons = vec![
            RegionPolygon::new("Donut", donut),
            RegionPolygon::new("Core", square(4.0, 4.0, 2.0)),
        ];
        let index = RegionIndex::new(&polygons);
        assert_eq!(index.locate(at(5.0, 5.0)).map(|p| p.name.as_str()), Some("Core"));
        assert_eq!(index.locate(at(1.0, 1.0)).map(|p| p.name.as_str()), Some("Donut"));
    }

    #[test]
    fn test_multipolygon_parts() {
        let parts = MultiPolygon::new(vec![square(0.0, 0.0, 1.0), square(5.0, 5.0, 1.0)]);
        let polygons = vec![RegionPolygon::new("Split", parts)];
        let index = RegionIndex::new(&polygons);
        assert!(index.locate(at(5.5, 5.5)).is_some());
        assert!(index.locate(at(3.0, 3.0)).is_none());
    }

    #[test]
    fn test_empty_geometry_is_skipped() {
        let polygons = vec![
            RegionPolygon::new("Empty", MultiPolygon::new(vec![])),
            RegionPolygon::new("A", square(0.0, 0.0, 1.0)),
        ];
        let matched = match_incidents(vec![IncidentRecord::new(0.5, 0.5, 3, 1, 20)], &polygons);
        assert_eq!(matched[0].region.as_deref(), Some("A"));
    }

    #[test]
    fn test_match_overwrites_stale_region() {
        let polygons = vec![RegionPolygon::new("A", square(0.0, 0.0, 1.0))];
        let mut stale = IncidentRecord::new(9.0, 9.0, 3, 1, 20);
        stale.region = Some("A".to_string());
        let matched = match_incidents(vec![stale], &polygons);
        assert!(matched[0].region.is_none());
    }

    proptest! {
        #[test]
        fn test_index_agrees_with_linear_scan(
            boxes in prop::collection::vec((0.0f64..20.0, 0.0f64..20.0, 0.5f64..8.0), 1..12),
            points in prop::collection::vec((-2.0f64..30.0, -2.0f64..30.0), 1..40)
        ) {
            let polygons: Vec<RegionPolygon> = boxes
                .iter()
                .enumerate()
                .map(|(i, &(x, y, s))| RegionPolygon::new(format!("R{}", i), square(x, y, s)))
                .collect();
            let index = RegionIndex::new(&polygons);
            for &(x, y) in &points {
                let fast = index.locate(at(x, y)).map(|p| p.name.clone());
                let slow = locate_linear(&polygons, at(x, y)).map(|p| p.name.clone());
                prop_assert_eq!(fast, slow);
            }
        }

        #[test]
        fn test_match_is_idempotent(
            points in prop::collection::vec((-1.0f64..11.0, -1.0f64..11.0), 0..40)
        ) {
            let polygons = vec![
                RegionPolygon::new("A", square(0.0, 0.0, 5.0)),
                RegionPolygon::new("B", square(3.0, 3.0, 5.0)),
                RegionPolygon::new("C", square(6.0, 0.0, 4.0)),
            ];
            let incidents: Vec<IncidentRecord> = points
                .iter()
                .map(|&(x, y)| IncidentRecord::new(x, y, 3, 1, 20))
                .collect();
            let once = match_incidents(incidents, &polygons);
            let twice = match_incidents(once.clone(), &polygons);
            prop_assert_eq!(once, twice);
        }
    }
}
