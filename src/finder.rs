use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{Local, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::catalog::{merge, prune_before};
use crate::config::{AppConfig, RunParameters};
use crate::coordinates::{cap_points, CoordinateSource};
use crate::errors::AppResult;
use crate::places::{PlaceObservation, PlacesService};
use crate::refinement::RefinementFrontier;
use crate::sampler::{CoordinateNoise, PassStats, Sampler};
use crate::store::{load_or_empty, CatalogStore};
use crate::warehouse::WarehouseSink;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub store_id: String,
    pub initial_points: usize,
    pub passes: Vec<PassStats>,
    pub refinement_points: usize,
    pub unrefined_saturated: usize,
    pub observed: usize,
    pub new_entries: usize,
    pub catalog_size: usize,
    pub snapshot_path: PathBuf,
    pub warehouse_rows: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub store_id: String,
    pub cutoff: NaiveDate,
    pub removed: usize,
    pub kept: usize,
}

/// One end-to-end discovery run: sample, refine, merge, persist.
pub struct RestaurantFinder {
    sampler: Sampler,
    store: Box<dyn CatalogStore>,
    warehouse: Option<Box<dyn WarehouseSink + Send>>,
    params: RunParameters,
    rng: StdRng,
}

impl RestaurantFinder {
    pub fn new(
        places: PlacesService,
        store: Box<dyn CatalogStore>,
        params: RunParameters,
        concurrency: usize,
    ) -> AppResult<Self> {
        params.validate()?;
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise = CoordinateNoise::new(params.noise_std_dev, StdRng::seed_from_u64(rng.gen()))?;
        Ok(Self {
            sampler: Sampler::new(places, noise, concurrency),
            store,
            warehouse: None,
            params,
            rng,
        })
    }

    pub fn from_config(
        config: &AppConfig,
        store: Box<dyn CatalogStore>,
        params: RunParameters,
    ) -> AppResult<Self> {
        let places = PlacesService::new(config)?;
        Self::new(places, store, params, config.places_concurrency)
    }

    pub fn with_warehouse(mut self, warehouse: Box<dyn WarehouseSink + Send>) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    /// Runs one discovery pass stamped with the local wall-clock time. Entries
    /// seen today get today's local date, so a run just before local midnight
    /// still records that day.
    pub async fn run(&mut self, source: &CoordinateSource, store_id: &str) -> AppResult<RunReport> {
        self.run_at(source, store_id, Local::now().naive_local()).await
    }

    /// Same as [`run`](Self::run) with an explicit local timestamp, which
    /// dates the catalog entries and names the snapshot.
    pub async fn run_at(
        &mut self,
        source: &CoordinateSource,
        store_id: &str,
        now: NaiveDateTime,
    ) -> AppResult<RunReport> {
        let points = source.load(self.params.radius)?;
        let points = cap_points(points, self.params.limit, &mut self.rng);
        let old_catalog = load_or_empty(self.store.as_ref(), store_id)?;
        info!(
            store_id,
            points = points.len(),
            known = old_catalog.len(),
            "starting discovery run"
        );

        let mut frontier = RefinementFrontier::new(
            self.params.max_refine_depth,
            self.params.spoke_distance,
            self.params.spoke_count,
        );
        frontier.mark_visited(&points);

        let first = self.sampler.sample(&points).await;
        let mut observations: HashMap<String, PlaceObservation> = first.observations;
        let mut saturated = first.saturated;
        let mut passes = vec![first.stats];
        let mut refinement_points = 0;

        while let Some(wave) = frontier.next_wave(&saturated) {
            if wave.is_empty() {
                saturated.clear();
                break;
            }
            refinement_points += wave.len();
            let pass = self.sampler.sample(&wave).await;
            observations.extend(pass.observations);
            saturated = pass.saturated;
            passes.push(pass.stats);
        }

        let outcome = merge(&observations, old_catalog, now.date());
        let snapshot_path = self
            .store
            .write_snapshot(store_id, &outcome.new_entries, now)?;
        self.store.write_catalog(store_id, &outcome.catalog)?;

        let warehouse_rows = match self.warehouse.as_mut() {
            Some(warehouse) => Some(warehouse.replace_all(&outcome.catalog)?),
            None => None,
        };

        let report = RunReport {
            store_id: store_id.to_string(),
            initial_points: points.len(),
            passes,
            refinement_points,
            unrefined_saturated: saturated.len(),
            observed: observations.len(),
            new_entries: outcome.new_entries.len(),
            catalog_size: outcome.catalog.len(),
            snapshot_path,
            warehouse_rows,
        };
        info!(
            store_id,
            observed = report.observed,
            new = report.new_entries,
            total = report.catalog_size,
            refinement_points,
            "discovery run complete"
        );
        Ok(report)
    }
}

/// Removes entries last seen before `cutoff` from a stored catalog.
pub fn prune_store(
    store: &dyn CatalogStore,
    store_id: &str,
    cutoff: NaiveDate,
) -> AppResult<PruneReport> {
    let mut catalog = store.read_catalog(store_id)?;
    let removed = prune_before(&mut catalog, cutoff);
    store.write_catalog(store_id, &catalog)?;
    Ok(PruneReport {
        store_id: store_id.to_string(),
        cutoff,
        removed,
        kept: catalog.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::catalog::{Catalog, CatalogEntry};
    use crate::errors::AppError;
    use crate::sampler::tests::{page_of, place, LatitudeSearch};
    use crate::store::FsCatalogStore;

    fn params() -> RunParameters {
        RunParameters {
            noise_std_dev: 0.0,
            spoke_count: 4,
            seed: Some(11),
            ..RunParameters::default()
        }
    }

    fn grid_source() -> CoordinateSource {
        // 2x2 grid: latitudes 10.0 and 9.0
        CoordinateSource::Grid {
            top_left: (10.0, 20.0),
            bottom_right: (8.0, 22.0),
            n_steps: 2,
        }
    }

    fn local(day: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
        day.and_hms_opt(hour, minute, 0).unwrap()
    }

    fn finder(search: Arc<LatitudeSearch>, root: &std::path::Path) -> RestaurantFinder {
        let places = PlacesService::with_search(search, 1, 0, StdRng::seed_from_u64(3));
        RestaurantFinder::new(places, Box::new(FsCatalogStore::new(root)), params(), 1).unwrap()
    }

    #[tokio::test]
    async fn saturated_points_get_one_refinement_pass() {
        let dir = tempdir().unwrap();
        let search = Arc::new(LatitudeSearch::new().page(10.0, page_of("dense-", 20)));
        let mut finder = finder(search.clone(), dir.path());
        let now = local(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), 12, 0);

        let report = finder.run_at(&grid_source(), "city", now).await.unwrap();

        // two grid points at latitude 10.0 saturate, each spawning four spokes
        assert_eq!(report.initial_points, 4);
        assert_eq!(report.passes.len(), 2);
        assert_eq!(report.passes[0].saturated, 2);
        assert_eq!(report.refinement_points, 8);
        assert_eq!(report.passes[1].queried, 8);
        assert_eq!(search.seen.lock().len(), 12);
        assert_eq!(report.unrefined_saturated, 0);
        assert_eq!(report.new_entries, 20);
        assert_eq!(report.catalog_size, 20);

        let store = FsCatalogStore::new(dir.path());
        let stored = store.read_catalog("city").unwrap();
        assert_eq!(stored.len(), 20);
        assert_eq!(
            stored.get("dense-0").unwrap().first_seen,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
        assert!(report.snapshot_path.exists());
    }

    #[tokio::test]
    async fn no_saturation_means_no_second_pass() {
        let dir = tempdir().unwrap();
        let page = crate::places::NearbyPage {
            places: vec![place("X1", 4.0)],
            returned: 1,
        };
        let search = Arc::new(LatitudeSearch::new().page(9.0, page));
        let mut finder = finder(search.clone(), dir.path());

        let report = finder.run(&grid_source(), "city").await.unwrap();

        assert_eq!(report.passes.len(), 1);
        assert_eq!(report.refinement_points, 0);
        assert_eq!(search.seen.lock().len(), 4);
        assert_eq!(report.catalog_size, 1);
    }

    #[tokio::test]
    async fn late_evening_run_keeps_the_local_date() {
        let dir = tempdir().unwrap();
        let page = crate::places::NearbyPage {
            places: vec![place("X1", 4.0)],
            returned: 1,
        };
        let search = Arc::new(LatitudeSearch::new().page(9.0, page));
        let mut finder = finder(search, dir.path());
        let new_years_day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

        let report = finder
            .run_at(&grid_source(), "city", local(new_years_day, 23, 30))
            .await
            .unwrap();

        let stored = FsCatalogStore::new(dir.path()).read_catalog("city").unwrap();
        let x1 = stored.get("X1").unwrap();
        assert_eq!(x1.first_seen, new_years_day);
        assert_eq!(x1.last_seen, new_years_day);
        assert_eq!(
            report.snapshot_path.file_name().unwrap().to_str().unwrap(),
            "restaurants_20250101_233000.json"
        );
    }

    #[tokio::test]
    async fn coordinate_errors_stop_the_run_before_queries() {
        let dir = tempdir().unwrap();
        let search = Arc::new(LatitudeSearch::new());
        let mut finder = finder(search.clone(), dir.path());
        let source = CoordinateSource::Csv {
            path: dir.path().join("missing.csv"),
            resolution: 2,
        };

        let err = finder.run(&source, "city").await.unwrap_err();

        assert!(matches!(err, AppError::Coordinates(_)));
        assert!(search.seen.lock().is_empty());
    }

    #[test]
    fn prune_rewrites_the_stored_catalog() {
        let dir = tempdir().unwrap();
        let store = FsCatalogStore::new(dir.path());
        let old = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let recent = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut catalog = Catalog::new();
        let mut stale = CatalogEntry::first_observed(&place("OLD", 3.0), old);
        stale.last_seen = old;
        catalog.insert("OLD", stale);
        catalog.insert("NEW", CatalogEntry::first_observed(&place("NEW", 4.0), recent));
        store.write_catalog("city", &catalog).unwrap();

        let report = prune_store(&store, "city", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()).unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.kept, 1);
        let stored = store.read_catalog("city").unwrap();
        assert!(stored.contains("NEW") && !stored.contains("OLD"));

        assert!(matches!(
            prune_store(&store, "elsewhere", recent),
            Err(AppError::CatalogNotFound(_))
        ));
    }
}
