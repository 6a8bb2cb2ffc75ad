//! Geodesic helpers for placing search points.
//!
//! Distances are in meters and angles in degrees. Projection uses a spherical
//! earth with the IUGG mean radius, which keeps spoke placement accurate to well
//! under a meter at the distances the sampler works with.

use std::collections::HashSet;
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

const DEG_TO_RAD: f64 = PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / PI;

/// A circle to query: center in degrees, radius in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
}

impl SearchPoint {
    pub fn new(latitude: f64, longitude: f64, radius: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// Returns `count` points at `distance` meters from the center, with bearings
/// `0, 360/count, 2*360/count, ...` degrees.
pub fn ring_points(center_lat: f64, center_long: f64, distance: f64, count: usize) -> Vec<(f64, f64)> {
    let step = 360.0 / count.max(1) as f64;
    (0..count)
        .map(|i| destination((center_lat, center_long), i as f64 * step, distance))
        .collect()
}

/// Great-circle destination from `start` along `bearing_deg` for `distance_m`.
pub fn destination(start: (f64, f64), bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let (lat1, lon1) = start;
    let lat1_rad = lat1 * DEG_TO_RAD;
    let lon1_rad = lon1 * DEG_TO_RAD;
    let bearing_rad = bearing_deg * DEG_TO_RAD;
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1_rad.sin();
    let cos_lat1 = lat1_rad.cos();
    let sin_d = angular_distance.sin();
    let cos_d = angular_distance.cos();

    let lat2_rad = (sin_lat1 * cos_d + cos_lat1 * sin_d * bearing_rad.cos())
        .clamp(-1.0, 1.0)
        .asin();
    let lon2_rad =
        lon1_rad + (bearing_rad.sin() * sin_d * cos_lat1).atan2(cos_d - sin_lat1 * lat2_rad.sin());

    (lat2_rad * RAD_TO_DEG, normalize_longitude(lon2_rad * RAD_TO_DEG))
}

/// Great-circle distance in meters.
pub fn haversine_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let lat1 = from.0 * DEG_TO_RAD;
    let lat2 = to.0 * DEG_TO_RAD;
    let d_lat = lat2 - lat1;
    let d_lon = (to.1 - from.1) * DEG_TO_RAD;

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Initial bearing from `from` to `to`, in `[0, 360)`.
pub fn initial_bearing(from: (f64, f64), to: (f64, f64)) -> f64 {
    let lat1 = from.0 * DEG_TO_RAD;
    let lat2 = to.0 * DEG_TO_RAD;
    let d_lon = (to.1 - from.1) * DEG_TO_RAD;

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    (y.atan2(x) * RAD_TO_DEG).rem_euclid(360.0)
}

/// Builds an `n_steps x n_steps` grid walking south from `top_left` and east
/// towards `bottom_right`. Every point carries `radius`.
pub fn rectangular_grid(
    top_left: (f64, f64),
    bottom_right: (f64, f64),
    n_steps: usize,
    radius: f64,
) -> AppResult<Vec<SearchPoint>> {
    if n_steps == 0 {
        return Err(AppError::Coordinates(
            "grid needs at least one step".into(),
        ));
    }

    let lat_step = (top_left.0 - bottom_right.0) / n_steps as f64;
    let long_step = (bottom_right.1 - top_left.1) / n_steps as f64;

    let mut seen = HashSet::with_capacity(n_steps * n_steps);
    let mut points = Vec::with_capacity(n_steps * n_steps);
    for i in 0..n_steps {
        for j in 0..n_steps {
            let lat = top_left.0 - i as f64 * lat_step;
            let long = top_left.1 + j as f64 * long_step;
            if !seen.insert((lat.to_bits(), long.to_bits())) {
                return Err(AppError::Coordinates(format!(
                    "grid between {top_left:?} and {bottom_right:?} contains duplicate point ({lat}, {long})"
                )));
            }
            points.push(SearchPoint::new(lat, long, radius));
        }
    }
    Ok(points)
}

/// Parses a corner written as `"(51.5, -0.12)"` or `"51.5,-0.12"`.
pub fn parse_corner(value: &str) -> AppResult<(f64, f64)> {
    let trimmed = value.trim().trim_start_matches('(').trim_end_matches(')');
    let mut parts = trimmed.split(',');
    let (Some(lat), Some(long), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AppError::Coordinates(format!(
            "expected `(lat, long)`, got `{value}`"
        )));
    };
    let parse = |raw: &str| {
        raw.trim()
            .parse::<f64>()
            .map_err(|err| AppError::Coordinates(format!("invalid coordinate `{raw}`: {err}")))
    };
    let (lat, long) = (parse(lat)?, parse(long)?);
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&long) {
        return Err(AppError::Coordinates(format!(
            "corner ({lat}, {long}) is outside valid latitude/longitude ranges"
        )));
    }
    Ok((lat, long))
}

fn normalize_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}
