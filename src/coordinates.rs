use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::geo::{rectangular_grid, SearchPoint};

const LAT_COLUMN: &str = "LAT";
const LONG_COLUMN: &str = "LONG";
const RADIUS_COLUMN: &str = "RADIUS";

/// Where the initial search points of a run come from.
#[derive(Debug, Clone)]
pub enum CoordinateSource {
    Csv {
        path: PathBuf,
        resolution: u32,
    },
    Grid {
        top_left: (f64, f64),
        bottom_right: (f64, f64),
        n_steps: usize,
    },
}

impl CoordinateSource {
    pub fn load(&self, default_radius: f64) -> AppResult<Vec<SearchPoint>> {
        match self {
            CoordinateSource::Csv { path, resolution } => {
                load_points_from_path(path, *resolution, default_radius)
            }
            CoordinateSource::Grid {
                top_left,
                bottom_right,
                n_steps,
            } => rectangular_grid(*top_left, *bottom_right, *n_steps, default_radius),
        }
    }
}

pub fn load_points_from_path(
    path: &Path,
    resolution: u32,
    default_radius: f64,
) -> AppResult<Vec<SearchPoint>> {
    let file = File::open(path).map_err(|err| {
        AppError::Coordinates(format!("cannot open {}: {err}", path.display()))
    })?;
    let points = load_points(file, resolution, default_radius)?;
    info!(
        path = %path.display(),
        points = points.len(),
        resolution,
        "loaded coordinate list"
    );
    Ok(points)
}

/// Reads `LAT`/`LONG` (and optional `RADIUS`) columns, rounds coordinates to
/// `resolution` decimals and drops repeats, keeping first-seen order.
pub fn load_points<R: Read>(
    reader: R,
    resolution: u32,
    default_radius: f64,
) -> AppResult<Vec<SearchPoint>> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    };
    let lat_idx = column(LAT_COLUMN)
        .ok_or_else(|| AppError::Coordinates(format!("missing `{LAT_COLUMN}` column")))?;
    let long_idx = column(LONG_COLUMN)
        .ok_or_else(|| AppError::Coordinates(format!("missing `{LONG_COLUMN}` column")))?;
    let radius_idx = column(RADIUS_COLUMN);

    let scale = 10_f64.powi(resolution as i32);
    let mut seen = HashSet::new();
    let mut points = Vec::new();
    for (row, record) in csv.records().enumerate() {
        let record = record?;
        let line = row + 2;
        let lat = parse_field(&record, lat_idx, LAT_COLUMN, line)?;
        let long = parse_field(&record, long_idx, LONG_COLUMN, line)?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&long) {
            return Err(AppError::Coordinates(format!(
                "line {line}: ({lat}, {long}) is outside valid ranges"
            )));
        }
        let radius = match radius_idx {
            Some(idx) if record.get(idx).is_some_and(|v| !v.is_empty()) => {
                parse_field(&record, idx, RADIUS_COLUMN, line)?
            }
            _ => default_radius,
        };

        let lat = (lat * scale).round() / scale;
        let long = (long * scale).round() / scale;
        if seen.insert((lat.to_bits(), long.to_bits(), radius.to_bits())) {
            points.push(SearchPoint::new(lat, long, radius));
        }
    }

    if points.is_empty() {
        return Err(AppError::Coordinates("coordinate list has no rows".into()));
    }
    Ok(points)
}

/// Randomly keeps `limit` points when there are more, preserving input order.
pub fn cap_points<R: Rng + ?Sized>(
    points: Vec<SearchPoint>,
    limit: usize,
    rng: &mut R,
) -> Vec<SearchPoint> {
    if points.len() <= limit {
        return points;
    }
    info!(
        available = points.len(),
        limit, "point count above limit; randomly sampling"
    );
    let mut keep = rand::seq::index::sample(rng, points.len(), limit).into_vec();
    keep.sort_unstable();
    debug!(?keep, "sampled point indices");
    keep.into_iter().map(|idx| points[idx]).collect()
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str, line: usize) -> AppResult<f64> {
    let raw = record
        .get(idx)
        .ok_or_else(|| AppError::Coordinates(format!("line {line}: missing `{name}` value")))?;
    let value = raw.parse::<f64>().map_err(|err| {
        AppError::Coordinates(format!("line {line}: invalid `{name}` value `{raw}`: {err}"))
    })?;
    if !value.is_finite() {
        return Err(AppError::Coordinates(format!(
            "line {line}: `{name}` is not a finite number"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    use super::*;

    const SAMPLE_CSV: &str = "POSTCODE,LAT,LONG\n\
        E1 6AN,51.5203,-0.0712\n\
        E1 6AW,51.5197,-0.0708\n\
        N1 9GU,51.5353,-0.1246\n";

    #[test]
    fn rounds_and_dedupes_points() {
        let points = load_points(SAMPLE_CSV.as_bytes(), 2, 666.0).unwrap();
        assert_eq!(
            points,
            vec![
                SearchPoint::new(51.52, -0.07, 666.0),
                SearchPoint::new(51.54, -0.12, 666.0),
            ]
        );
    }

    #[test]
    fn honours_radius_column() {
        let csv = "lat,long,radius\n10.0,20.0,250\n10.0,20.0,\n";
        let points = load_points(csv.as_bytes(), 4, 666.0).unwrap();
        assert_eq!(
            points,
            vec![
                SearchPoint::new(10.0, 20.0, 250.0),
                SearchPoint::new(10.0, 20.0, 666.0),
            ]
        );
    }

    #[test]
    fn missing_columns_are_fatal() {
        let err = load_points("LAT,LNG\n1,2\n".as_bytes(), 2, 100.0).unwrap_err();
        assert!(matches!(err, AppError::Coordinates(msg) if msg.contains("LONG")));
    }

    #[test]
    fn malformed_values_are_fatal() {
        let err = load_points("LAT,LONG\n51.5,west\n".as_bytes(), 2, 100.0).unwrap_err();
        assert!(matches!(err, AppError::Coordinates(msg) if msg.contains("line 2")));
        assert!(load_points("LAT,LONG\n".as_bytes(), 2, 100.0).is_err());
        assert!(load_points("LAT,LONG\n120.0,0.0\n".as_bytes(), 2, 100.0).is_err());
    }

    #[test]
    fn loads_from_disk_and_reports_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latlong.csv");
        std::fs::write(&path, SAMPLE_CSV).unwrap();

        let source = CoordinateSource::Csv {
            path: path.clone(),
            resolution: 4,
        };
        assert_eq!(source.load(500.0).unwrap().len(), 3);

        let missing = load_points_from_path(&dir.path().join("nope.csv"), 2, 500.0);
        assert!(matches!(missing, Err(AppError::Coordinates(_))));
    }

    #[test]
    fn grid_source_builds_grid() {
        let source = CoordinateSource::Grid {
            top_left: (51.6, -0.3),
            bottom_right: (51.4, 0.1),
            n_steps: 4,
        };
        let points = source.load(6666.0).unwrap();
        assert_eq!(points.len(), 16);

        let empty = CoordinateSource::Grid {
            top_left: (51.6, -0.3),
            bottom_right: (51.4, 0.1),
            n_steps: 0,
        };
        assert!(matches!(empty.load(6666.0), Err(AppError::Coordinates(_))));
    }

    #[test]
    fn caps_points_with_random_subset() {
        let points: Vec<_> = (0..50)
            .map(|i| SearchPoint::new(i as f64 * 0.01, 0.0, 100.0))
            .collect();
        let mut rng = StdRng::seed_from_u64(7);
        let capped = cap_points(points.clone(), 20, &mut rng);
        assert_eq!(capped.len(), 20);
        assert!(capped.iter().all(|p| points.contains(p)));
        assert!(capped
            .windows(2)
            .all(|pair| pair[0].latitude < pair[1].latitude));

        let small = cap_points(points[..5].to_vec(), 20, &mut rng);
        assert_eq!(small.len(), 5);
    }
}
