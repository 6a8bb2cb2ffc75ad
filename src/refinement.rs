use std::collections::HashSet;

use tracing::{debug, info};

use crate::geo::{ring_points, SearchPoint};

/// Smallest radius a refinement query is allowed to shrink to, in meters.
pub const MIN_REFINED_RADIUS: f64 = 1.0;

const VISITED_SCALE: f64 = 1e5;

/// Rings `spoke_count` follow-up points around each saturated center at half
/// its radius.
pub fn plan(saturated: &[SearchPoint], spoke_distance: f64, spoke_count: usize) -> Vec<SearchPoint> {
    saturated
        .iter()
        .flat_map(|point| {
            let radius = refined_radius(point.radius);
            ring_points(point.latitude, point.longitude, spoke_distance, spoke_count)
                .into_iter()
                .map(move |(lat, long)| SearchPoint::new(lat, long, radius))
        })
        .collect()
}

pub fn refined_radius(radius: f64) -> f64 {
    (radius / 2.0).max(MIN_REFINED_RADIUS)
}

/// Work queue state for refinement. Each wave is one extra sampling pass; the
/// frontier stops once `max_depth` waves have been handed out and never
/// returns a center it has already seen.
#[derive(Debug)]
pub struct RefinementFrontier {
    max_depth: usize,
    depth: usize,
    spoke_distance: f64,
    spoke_count: usize,
    visited: HashSet<(i64, i64)>,
}

impl RefinementFrontier {
    pub fn new(max_depth: usize, spoke_distance: f64, spoke_count: usize) -> Self {
        Self {
            max_depth,
            depth: 0,
            spoke_distance,
            spoke_count,
            visited: HashSet::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn mark_visited(&mut self, points: &[SearchPoint]) {
        for point in points {
            self.visited.insert(visit_key(point));
        }
    }

    /// Plans the next wave from the previous pass's saturated points. `None`
    /// means refinement is finished.
    pub fn next_wave(&mut self, saturated: &[SearchPoint]) -> Option<Vec<SearchPoint>> {
        if saturated.is_empty() {
            return None;
        }
        if self.depth >= self.max_depth {
            info!(
                depth = self.depth,
                remaining = saturated.len(),
                "refinement depth reached; leaving saturated points unrefined"
            );
            return None;
        }

        let planned = plan(saturated, self.spoke_distance, self.spoke_count);
        let planned_len = planned.len();
        let wave: Vec<SearchPoint> = planned
            .into_iter()
            .filter(|point| self.visited.insert(visit_key(point)))
            .collect();
        self.depth += 1;

        if wave.len() < planned_len {
            debug!(
                skipped = planned_len - wave.len(),
                "dropped refinement points already visited"
            );
        }
        info!(
            depth = self.depth,
            saturated = saturated.len(),
            points = wave.len(),
            "planned refinement wave"
        );
        Some(wave)
    }
}

fn visit_key(point: &SearchPoint) -> (i64, i64) {
    (
        (point.latitude * VISITED_SCALE).round() as i64,
        (point.longitude * VISITED_SCALE).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::haversine_m;

    #[test]
    fn four_spokes_at_half_radius() {
        let saturated = [SearchPoint::new(51.52, -0.07, 666.0)];
        let spokes = plan(&saturated, 100.0, 4);

        assert_eq!(spokes.len(), 4);
        for spoke in &spokes {
            assert_eq!(spoke.radius, 333.0);
            let distance = haversine_m(saturated[0].center(), spoke.center());
            assert!((distance - 100.0).abs() < 1e-3);
        }
    }

    #[test]
    fn radius_never_drops_below_a_meter() {
        let spokes = plan(&[SearchPoint::new(0.0, 0.0, 1.5)], 100.0, 4);
        assert!(spokes.iter().all(|spoke| spoke.radius == 1.0));
        assert_eq!(refined_radius(3.0), 1.5);
    }

    #[test]
    fn spokes_follow_each_saturated_center() {
        let saturated = [
            SearchPoint::new(10.0, 10.0, 400.0),
            SearchPoint::new(-20.0, 30.0, 800.0),
        ];
        let spokes = plan(&saturated, 250.0, 6);

        assert_eq!(spokes.len(), 12);
        for spoke in &spokes[..6] {
            assert_eq!(spoke.radius, 200.0);
            assert!((haversine_m((10.0, 10.0), spoke.center()) - 250.0).abs() < 1e-3);
        }
        for spoke in &spokes[6..] {
            assert_eq!(spoke.radius, 400.0);
            assert!((haversine_m((-20.0, 30.0), spoke.center()) - 250.0).abs() < 1e-3);
        }
    }

    #[test]
    fn frontier_stops_at_max_depth() {
        let saturated = [SearchPoint::new(51.5, -0.1, 666.0)];
        let mut frontier = RefinementFrontier::new(1, 100.0, 4);

        let wave = frontier.next_wave(&saturated).unwrap();
        assert_eq!(wave.len(), 4);
        assert_eq!(frontier.depth(), 1);

        assert!(frontier.next_wave(&wave).is_none());
        assert!(RefinementFrontier::new(0, 100.0, 4)
            .next_wave(&saturated)
            .is_none());
    }

    #[test]
    fn frontier_skips_visited_centers() {
        let point = SearchPoint::new(51.5, -0.1, 666.0);
        let mut frontier = RefinementFrontier::new(3, 100.0, 2);

        // the same saturated point twice yields each spoke only once
        let first = frontier.next_wave(&[point, point]).unwrap();
        assert_eq!(first.len(), 2);

        let repeat = frontier.next_wave(&[point]).unwrap();
        assert!(repeat.is_empty());
        assert!(frontier.next_wave(&[]).is_none());
    }
}
