use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{trace, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geo::SearchPoint;

/// Most places the nearby-search endpoint returns for one call.
pub const RESULT_CAP: usize = 20;

const FIELD_MASK: &str = "places.id,places.displayName,places.shortFormattedAddress,places.rating,places.priceLevel,places.primaryType,places.userRatingCount,places.types";
const MISSING_TEXT: &str = "NA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankStrategy {
    Distance,
}

impl RankStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankStrategy::Distance => "DISTANCE",
        }
    }
}

/// One place as returned by a nearby search, with API defaults filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceObservation {
    pub id: String,
    pub display_name: String,
    pub short_formatted_address: String,
    pub rating: f64,
    pub price_level: String,
    pub primary_type: String,
    pub user_rating_count: u64,
    pub types: BTreeSet<String>,
}

/// Places from one call. `returned` counts every place the API sent, including
/// any dropped during normalization, so saturation is judged on the raw page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NearbyPage {
    pub places: Vec<PlaceObservation>,
    pub returned: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Page(NearbyPage),
    Failed,
}

#[async_trait]
pub trait PlaceSearch: Send + Sync {
    async fn search_nearby(&self, point: &SearchPoint, rank: RankStrategy) -> AppResult<NearbyPage>;
}

/// Nearby search with bounded retries; exhausted retries degrade to
/// [`SearchOutcome::Failed`] instead of an error.
#[derive(Clone)]
pub struct PlacesService {
    inner: Arc<dyn PlaceSearch>,
    max_attempts: u32,
    backoff_ms: u64,
    jitter_rng: Arc<Mutex<StdRng>>,
}

impl PlacesService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let client = HttpPlacesClient::new(config)?;
        Ok(Self::with_search(
            Arc::new(client),
            config.places_max_attempts,
            config.places_backoff_ms,
            StdRng::from_entropy(),
        ))
    }

    pub fn with_search(
        inner: Arc<dyn PlaceSearch>,
        max_attempts: u32,
        backoff_ms: u64,
        rng: StdRng,
    ) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff_ms,
            jitter_rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub async fn search(&self, point: &SearchPoint, rank: RankStrategy) -> SearchOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.search_nearby(point, rank).await {
                Ok(page) => return SearchOutcome::Page(page),
                Err(err) if attempt < self.max_attempts && err.is_retryable() => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        error = %err,
                        attempt,
                        lat = point.latitude,
                        long = point.longitude,
                        "nearby search failed; retrying after {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        attempt,
                        lat = point.latitude,
                        long = point.longitude,
                        "nearby search failed; treating point as empty"
                    );
                    return SearchOutcome::Failed;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.backoff_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(6);
        let base = Duration::from_millis(self.backoff_ms.saturating_mul(1 << exponent));
        let jitter = {
            let mut rng = self.jitter_rng.lock();
            Duration::from_millis(rng.gen_range(0..self.backoff_ms))
        };
        base.saturating_add(jitter)
    }
}

struct HttpPlacesClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    included_primary_types: Vec<String>,
    excluded_primary_types: Vec<String>,
    excluded_types: Vec<String>,
}

impl HttpPlacesClient {
    fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("restaurant-finder/", env!("CARGO_PKG_VERSION")))
            .timeout(config.places_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: config.places_endpoint.clone(),
            api_key: config.require_api_key()?,
            included_primary_types: config.included_primary_types.clone(),
            excluded_primary_types: config.excluded_primary_types.clone(),
            excluded_types: config.excluded_types.clone(),
        })
    }

    fn request_body<'a>(&'a self, point: &SearchPoint, rank: RankStrategy) -> RequestBody<'a> {
        RequestBody {
            rank_preference: rank.as_str(),
            max_result_count: RESULT_CAP as u8,
            included_primary_types: &self.included_primary_types,
            excluded_primary_types: &self.excluded_primary_types,
            excluded_types: &self.excluded_types,
            location_restriction: LocationRestriction {
                circle: Circle {
                    center: Center {
                        latitude: point.latitude,
                        longitude: point.longitude,
                    },
                    radius: point.radius,
                },
            },
        }
    }
}

#[async_trait]
impl PlaceSearch for HttpPlacesClient {
    async fn search_nearby(&self, point: &SearchPoint, rank: RankStrategy) -> AppResult<NearbyPage> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&self.request_body(point, rank))
            .send()
            .await?
            .error_for_status()?;

        let text = response.text().await?;
        let parsed: Response = serde_json::from_str(&text)?;
        if let Some(error) = parsed.error {
            return Err(AppError::Places(
                error.message.unwrap_or_else(|| "error payload without message".into()),
            ));
        }
        let page = normalize_page(parsed.places.unwrap_or_default());
        trace!(
            lat = point.latitude,
            long = point.longitude,
            returned = page.returned,
            kept = page.places.len(),
            "nearby search page received"
        );
        Ok(page)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    rank_preference: &'a str,
    max_result_count: u8,
    included_primary_types: &'a [String],
    excluded_primary_types: &'a [String],
    excluded_types: &'a [String],
    location_restriction: LocationRestriction,
}

#[derive(Serialize)]
struct LocationRestriction {
    circle: Circle,
}

#[derive(Serialize)]
struct Circle {
    center: Center,
    radius: f64,
}

#[derive(Serialize)]
struct Center {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct Response {
    places: Option<Vec<ResponsePlace>>,
    error: Option<ResponseError>,
}

#[derive(Deserialize)]
struct ResponseError {
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePlace {
    id: Option<String>,
    display_name: Option<ResponseText>,
    short_formatted_address: Option<String>,
    rating: Option<f64>,
    price_level: Option<String>,
    primary_type: Option<String>,
    user_rating_count: Option<u64>,
    types: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ResponseText {
    text: Option<String>,
}

fn normalize_page(raw: Vec<ResponsePlace>) -> NearbyPage {
    let returned = raw.len();
    let places = raw
        .into_iter()
        .filter_map(|place| {
            let Some(id) = place.id.filter(|id| !id.trim().is_empty()) else {
                warn!("nearby search returned a place without an id; skipping");
                return None;
            };
            Some(PlaceObservation {
                id,
                display_name: place
                    .display_name
                    .and_then(|name| name.text)
                    .unwrap_or_else(|| MISSING_TEXT.to_string()),
                short_formatted_address: place
                    .short_formatted_address
                    .unwrap_or_else(|| MISSING_TEXT.to_string()),
                rating: place.rating.unwrap_or(0.0),
                price_level: place
                    .price_level
                    .unwrap_or_else(|| MISSING_TEXT.to_string()),
                primary_type: place
                    .primary_type
                    .unwrap_or_else(|| MISSING_TEXT.to_string()),
                user_rating_count: place.user_rating_count.unwrap_or(0),
                types: place.types.unwrap_or_default().into_iter().collect(),
            })
        })
        .collect();
    NearbyPage { places, returned }
}
