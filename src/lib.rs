pub mod catalog;
pub mod config;
pub mod coordinates;
pub mod errors;
pub mod finder;
pub mod geo;
pub mod places;
pub mod refinement;
pub mod sampler;
pub mod store;
pub mod warehouse;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use catalog::{merge, Catalog, CatalogEntry, MergeOutcome};
pub use config::{AppConfig, RunParameters};
pub use coordinates::CoordinateSource;
pub use errors::{AppError, AppResult};
pub use finder::{prune_store, PruneReport, RestaurantFinder, RunReport};
pub use geo::SearchPoint;
pub use places::{PlaceObservation, PlacesService};
pub use store::{CatalogStore, FsCatalogStore};
pub use warehouse::{SqliteWarehouse, WarehouseSink};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,restaurant_finder=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
