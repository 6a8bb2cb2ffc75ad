use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_NEARBY_ENDPOINT: &str = "https://places.googleapis.com/v1/places:searchNearby";
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const MAX_ATTEMPTS_CEILING: u32 = 5;

const INCLUDED_PRIMARY_TYPES: &[&str] = &[
    "afghani_restaurant",
    "african_restaurant",
    "american_restaurant",
    "asian_restaurant",
    "barbecue_restaurant",
    "brazilian_restaurant",
    "buffet_restaurant",
    "chinese_restaurant",
    "french_restaurant",
    "greek_restaurant",
    "hamburger_restaurant",
    "indian_restaurant",
    "indonesian_restaurant",
    "italian_restaurant",
    "japanese_restaurant",
    "korean_restaurant",
    "lebanese_restaurant",
    "mediterranean_restaurant",
    "mexican_restaurant",
    "middle_eastern_restaurant",
    "pizza_restaurant",
    "ramen_restaurant",
    "restaurant",
    "seafood_restaurant",
    "spanish_restaurant",
    "steak_house",
    "sushi_restaurant",
    "thai_restaurant",
    "turkish_restaurant",
    "vegetarian_restaurant",
    "vietnamese_restaurant",
];

const EXCLUDED_PRIMARY_TYPES: &[&str] = &[
    "acai_shop",
    "bagel_shop",
    "bakery",
    "bar",
    "bar_and_grill",
    "breakfast_restaurant",
    "brunch_restaurant",
    "cafe",
    "cafeteria",
    "candy_store",
    "cat_cafe",
    "chocolate_factory",
    "chocolate_shop",
    "coffee_shop",
    "confectionery",
    "deli",
    "dessert_restaurant",
    "dessert_shop",
    "dog_cafe",
    "donut_shop",
    "fast_food_restaurant",
    "fine_dining_restaurant",
    "food_court",
    "ice_cream_shop",
    "juice_shop",
    "meal_delivery",
    "meal_takeaway",
    "pub",
    "sandwich_shop",
    "tea_house",
    "vegan_restaurant",
    "wine_bar",
];

const EXCLUDED_TYPES: &[&str] = &[
    "acai_shop",
    "bagel_shop",
    "bakery",
    "bar",
    "candy_store",
    "cat_cafe",
    "chocolate_factory",
    "chocolate_shop",
    "coffee_shop",
    "dessert_restaurant",
    "dessert_shop",
    "dog_cafe",
    "donut_shop",
    "fast_food_restaurant",
    "food_court",
    "ice_cream_shop",
    "juice_shop",
    "pub",
    "sandwich_shop",
    "tea_house",
    "wine_bar",
];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub google_places_api_key: Option<SecretString>,
    pub places_endpoint: String,
    /// Per-query deadline; a call that exceeds it is retried like a transport error.
    pub places_timeout: Duration,
    pub places_max_attempts: u32,
    pub places_backoff_ms: u64,
    pub places_concurrency: usize,
    pub included_primary_types: Vec<String>,
    pub excluded_primary_types: Vec<String>,
    pub excluded_types: Vec<String>,
    pub data_dir: PathBuf,
    pub catalog_store_id: String,
    pub warehouse_file_name: Option<String>,
}

/// Loggable view of [`AppConfig`] with the API key reduced to a flag.
#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub places_endpoint: String,
    pub places_timeout_secs: u64,
    pub places_max_attempts: u32,
    pub places_concurrency: usize,
    pub included_primary_types: usize,
    pub excluded_primary_types: usize,
    pub excluded_types: usize,
    pub data_dir: String,
    pub catalog_store_id: String,
    pub warehouse_file_name: Option<String>,
    pub has_google_places_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            google_places_api_key: env::var("GOOGLE_PLACES_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::new(v.into())),
            places_endpoint: env::var("PLACES_NEARBY_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_NEARBY_ENDPOINT.to_string()),
            places_timeout: Duration::from_secs(parse_u64("PLACES_TIMEOUT_SECS", 10).max(1)),
            places_max_attempts: parse_u32("PLACES_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)
                .clamp(1, MAX_ATTEMPTS_CEILING),
            places_backoff_ms: parse_u64("PLACES_BACKOFF_MS", 250),
            places_concurrency: parse_usize("PLACES_CONCURRENCY", 1).max(1),
            included_primary_types: parse_list(
                "PLACES_INCLUDED_PRIMARY_TYPES",
                INCLUDED_PRIMARY_TYPES,
            ),
            excluded_primary_types: parse_list(
                "PLACES_EXCLUDED_PRIMARY_TYPES",
                EXCLUDED_PRIMARY_TYPES,
            ),
            excluded_types: parse_list("PLACES_EXCLUDED_TYPES", EXCLUDED_TYPES),
            data_dir: env::var("CATALOG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            catalog_store_id: env::var("CATALOG_STORE_ID")
                .unwrap_or_else(|_| "restaurants".to_string()),
            warehouse_file_name: env::var("WAREHOUSE_FILE_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    /// Configuration pointed at an arbitrary endpoint, with the default
    /// category filters and no dotenv or environment lookups.
    pub fn for_endpoint(endpoint: impl Into<String>, api_key: &str) -> Self {
        Self {
            google_places_api_key: Some(SecretString::new(api_key.into())),
            places_endpoint: endpoint.into(),
            places_timeout: Duration::from_secs(10),
            places_max_attempts: DEFAULT_MAX_ATTEMPTS,
            places_backoff_ms: 250,
            places_concurrency: 1,
            included_primary_types: to_owned_list(INCLUDED_PRIMARY_TYPES),
            excluded_primary_types: to_owned_list(EXCLUDED_PRIMARY_TYPES),
            excluded_types: to_owned_list(EXCLUDED_TYPES),
            data_dir: PathBuf::from("data"),
            catalog_store_id: "restaurants".to_string(),
            warehouse_file_name: None,
        }
    }

    pub fn require_api_key(&self) -> AppResult<SecretString> {
        self.google_places_api_key.clone().ok_or_else(|| {
            AppError::Config("GOOGLE_PLACES_API_KEY environment variable not set".into())
        })
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            places_endpoint: self.places_endpoint.clone(),
            places_timeout_secs: self.places_timeout.as_secs(),
            places_max_attempts: self.places_max_attempts,
            places_concurrency: self.places_concurrency,
            included_primary_types: self.included_primary_types.len(),
            excluded_primary_types: self.excluded_primary_types.len(),
            excluded_types: self.excluded_types.len(),
            data_dir: self.data_dir.to_string_lossy().to_string(),
            catalog_store_id: self.catalog_store_id.clone(),
            warehouse_file_name: self.warehouse_file_name.clone(),
            has_google_places_key: self.google_places_api_key.is_some(),
        }
    }
}

/// Tunables for one discovery run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunParameters {
    pub radius: f64,
    pub limit: usize,
    pub noise_std_dev: f64,
    pub spoke_distance: f64,
    pub spoke_count: usize,
    pub max_refine_depth: usize,
    pub seed: Option<u64>,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            radius: 666.0,
            limit: 20,
            noise_std_dev: 0.002,
            spoke_distance: 100.0,
            spoke_count: 6,
            max_refine_depth: 1,
            seed: None,
        }
    }
}

impl RunParameters {
    pub fn validate(&self) -> AppResult<()> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(AppError::Config(format!(
                "radius must be a positive number of meters, got {}",
                self.radius
            )));
        }
        if self.limit == 0 {
            return Err(AppError::Config("point limit must be at least 1".into()));
        }
        if !self.noise_std_dev.is_finite() || self.noise_std_dev < 0.0 {
            return Err(AppError::Config(format!(
                "noise standard deviation must be >= 0, got {}",
                self.noise_std_dev
            )));
        }
        if !self.spoke_distance.is_finite() || self.spoke_distance < 0.0 {
            return Err(AppError::Config(format!(
                "spoke distance must be >= 0, got {}",
                self.spoke_distance
            )));
        }
        if self.spoke_count == 0 {
            return Err(AppError::Config("spoke count must be at least 1".into()));
        }
        Ok(())
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        _ => to_owned_list(default),
    }
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GOOGLE_PLACES_API_KEY", "secret");
        env::set_var("CATALOG_STORE_ID", "london");
        env::set_var("PLACES_MAX_ATTEMPTS", "40");
        env::set_var("PLACES_EXCLUDED_TYPES", "bar, pub ,");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.catalog_store_id, "london");
        assert!(public.has_google_places_key);
        assert!(config.require_api_key().is_ok());
        assert_eq!(public.places_max_attempts, MAX_ATTEMPTS_CEILING);
        assert_eq!(config.excluded_types, vec!["bar", "pub"]);
        assert_eq!(
            config.included_primary_types.len(),
            INCLUDED_PRIMARY_TYPES.len()
        );
        let rendered = serde_json::to_string(&public).unwrap();
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn endpoint_config_uses_default_filters() {
        let config = AppConfig::for_endpoint("http://localhost/nearby", "key");
        assert_eq!(config.places_endpoint, "http://localhost/nearby");
        assert_eq!(config.excluded_types.len(), EXCLUDED_TYPES.len());
        assert_eq!(config.places_concurrency, 1);
        assert_eq!(config.places_timeout, Duration::from_secs(10));
        assert_eq!(config.public_profile().places_timeout_secs, 10);
    }

    #[test]
    fn rejects_invalid_run_parameters() {
        assert!(RunParameters::default().validate().is_ok());

        let negative_noise = RunParameters {
            noise_std_dev: -0.1,
            ..RunParameters::default()
        };
        assert!(matches!(
            negative_noise.validate(),
            Err(AppError::Config(_))
        ));

        let no_spokes = RunParameters {
            spoke_count: 0,
            ..RunParameters::default()
        };
        assert!(no_spokes.validate().is_err());

        let zero_radius = RunParameters {
            radius: 0.0,
            ..RunParameters::default()
        };
        assert!(zero_radius.validate().is_err());
    }
}
