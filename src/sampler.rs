use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::geo::SearchPoint;
use crate::places::{PlaceObservation, PlacesService, RankStrategy, SearchOutcome, RESULT_CAP};

/// How a single response relates to the per-call result cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saturation {
    Empty,
    Partial,
    Saturated,
}

pub fn classify(returned: usize) -> Saturation {
    match returned {
        0 => Saturation::Empty,
        n if n >= RESULT_CAP => Saturation::Saturated,
        _ => Saturation::Partial,
    }
}

/// Independent Gaussian jitter on latitude and longitude, in degrees.
#[derive(Clone)]
pub struct CoordinateNoise {
    normal: Option<Normal<f64>>,
    rng: Arc<Mutex<StdRng>>,
}

impl CoordinateNoise {
    pub fn new(std_dev: f64, rng: StdRng) -> AppResult<Self> {
        let normal = if std_dev == 0.0 {
            None
        } else {
            Some(Normal::new(0.0, std_dev).map_err(|err| {
                AppError::Config(format!("invalid noise standard deviation {std_dev}: {err}"))
            })?)
        };
        Ok(Self {
            normal,
            rng: Arc::new(Mutex::new(rng)),
        })
    }

    pub fn disabled(rng: StdRng) -> Self {
        Self {
            normal: None,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn perturb(&self, point: &SearchPoint) -> SearchPoint {
        let Some(normal) = self.normal else {
            return *point;
        };
        let mut rng = self.rng.lock();
        SearchPoint {
            latitude: point.latitude + normal.sample(&mut *rng),
            longitude: point.longitude + normal.sample(&mut *rng),
            radius: point.radius,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub queried: usize,
    pub failed: usize,
    pub empty: usize,
    pub partial: usize,
    pub saturated: usize,
    pub places_returned: usize,
}

/// Everything one pass over a batch of points discovered.
#[derive(Debug, Clone, Default)]
pub struct SamplePass {
    pub observations: HashMap<String, PlaceObservation>,
    pub saturated: Vec<SearchPoint>,
    pub stats: PassStats,
}

pub struct Sampler {
    places: PlacesService,
    rank: RankStrategy,
    noise: CoordinateNoise,
    concurrency: usize,
}

impl Sampler {
    pub fn new(places: PlacesService, noise: CoordinateNoise, concurrency: usize) -> Self {
        Self {
            places,
            rank: RankStrategy::Distance,
            noise,
            concurrency: concurrency.max(1),
        }
    }

    /// Queries every point once. Responses are folded in input order, so when
    /// the same place shows up under several points the last point's copy wins
    /// regardless of which request finished first.
    pub async fn sample(&self, points: &[SearchPoint]) -> SamplePass {
        let queries: Vec<SearchPoint> = points.iter().map(|p| self.noise.perturb(p)).collect();
        let places = &self.places;
        let rank = self.rank;
        let outcomes: Vec<(SearchPoint, SearchOutcome)> = stream::iter(queries)
            .map(|query| async move {
                let outcome = places.search(&query, rank).await;
                (query, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut pass = SamplePass::default();
        for (query, outcome) in outcomes {
            pass.stats.queried += 1;
            let page = match outcome {
                SearchOutcome::Page(page) => page,
                SearchOutcome::Failed => {
                    pass.stats.failed += 1;
                    continue;
                }
            };
            pass.stats.places_returned += page.returned;
            match classify(page.returned) {
                Saturation::Empty => {
                    debug!(lat = query.latitude, long = query.longitude, "point had no results");
                    pass.stats.empty += 1;
                    continue;
                }
                Saturation::Partial => {
                    debug!(
                        lat = query.latitude,
                        long = query.longitude,
                        returned = page.returned,
                        "point had 1-19 results"
                    );
                    pass.stats.partial += 1;
                }
                Saturation::Saturated => {
                    debug!(
                        lat = query.latitude,
                        long = query.longitude,
                        radius = query.radius,
                        "point hit the result cap"
                    );
                    pass.stats.saturated += 1;
                    pass.saturated.push(query);
                }
            }
            for place in page.places {
                pass.observations.insert(place.id.clone(), place);
            }
        }

        info!(
            rank = self.rank.as_str(),
            queried = pass.stats.queried,
            failed = pass.stats.failed,
            empty = pass.stats.empty,
            saturated = pass.stats.saturated,
            observed = pass.observations.len(),
            "sampling pass complete"
        );
        pass
    }
}
