use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use restaurant_finder::config::RunParameters;
use restaurant_finder::geo::parse_corner;
use restaurant_finder::{
    init_tracing, prune_store, AppConfig, CoordinateSource, FsCatalogStore, RestaurantFinder,
    SqliteWarehouse,
};
use tracing::debug;

#[derive(Parser)]
#[command(name = "restaurant-finder")]
#[command(about = "Discover restaurants over a region and maintain a dated catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sample the region, refine saturated points and merge into the catalog
    Run(RunArgs),
    /// Delete catalog entries last seen before a cutoff date
    Prune(PruneArgs),
}

#[derive(Args)]
struct RunArgs {
    /// CSV with LAT/LONG (and optional RADIUS) columns
    #[arg(long, conflicts_with_all = ["top_left", "bottom_right"])]
    latlong_list: Option<PathBuf>,

    /// Top-left grid corner, e.g. "(51.6, -0.3)"
    #[arg(long, requires = "bottom_right")]
    top_left: Option<String>,

    /// Bottom-right grid corner, e.g. "(51.4, 0.1)"
    #[arg(long, requires = "top_left")]
    bottom_right: Option<String>,

    /// Grid steps per side
    #[arg(long, default_value = "3")]
    n_steps: usize,

    /// Default search radius in meters
    #[arg(long, default_value = "666")]
    radius: f64,

    /// Maximum number of points queried in the first pass
    #[arg(long, default_value = "20")]
    limit: usize,

    /// Standard deviation of coordinate noise, in degrees
    #[arg(long, default_value = "0.002")]
    noise: f64,

    /// Decimal places coordinates are rounded to before deduplication
    #[arg(long, default_value = "2")]
    latlong_resolution: u32,

    /// Distance of refinement spokes from a saturated point, in meters
    #[arg(long, default_value = "100")]
    spoke_distance: f64,

    /// Number of refinement spokes per saturated point
    #[arg(long, default_value = "6")]
    spoke_count: usize,

    /// Number of refinement passes after the first
    #[arg(long, default_value = "1")]
    max_refine_depth: usize,

    /// Seed for point sampling and noise
    #[arg(long)]
    seed: Option<u64>,

    /// Catalog store id, overriding CATALOG_STORE_ID
    #[arg(long)]
    store_id: Option<String>,

    /// Skip forwarding the catalog to the warehouse
    #[arg(long)]
    no_warehouse: bool,
}

#[derive(Args)]
struct PruneArgs {
    /// Entries last seen before this date (YYYY-MM-DD) are removed
    #[arg(long)]
    date_cutoff: NaiveDate,

    /// Catalog store id, overriding CATALOG_STORE_ID
    #[arg(long)]
    store_id: Option<String>,
}

impl RunArgs {
    fn parameters(&self) -> RunParameters {
        RunParameters {
            radius: self.radius,
            limit: self.limit,
            noise_std_dev: self.noise,
            spoke_distance: self.spoke_distance,
            spoke_count: self.spoke_count,
            max_refine_depth: self.max_refine_depth,
            seed: self.seed,
        }
    }

    fn source(&self) -> anyhow::Result<CoordinateSource> {
        match (&self.latlong_list, &self.top_left, &self.bottom_right) {
            (Some(path), _, _) => Ok(CoordinateSource::Csv {
                path: path.clone(),
                resolution: self.latlong_resolution,
            }),
            (None, Some(top_left), Some(bottom_right)) => Ok(CoordinateSource::Grid {
                top_left: parse_corner(top_left)?,
                bottom_right: parse_corner(bottom_right)?,
                n_steps: self.n_steps,
            }),
            _ => bail!("pass either --latlong-list or both --top-left and --bottom-right"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();
    debug!(config = ?config.public_profile(), "configuration loaded");

    match cli.command {
        Command::Run(args) => run(&config, args).await,
        Command::Prune(args) => prune(&config, args),
    }
}

async fn run(config: &AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let source = args.source()?;
    let store_id = args
        .store_id
        .clone()
        .unwrap_or_else(|| config.catalog_store_id.clone());
    let store = FsCatalogStore::new(&config.data_dir);

    let mut finder = RestaurantFinder::from_config(config, Box::new(store), args.parameters())
        .context("failed to set up discovery run")?;
    if let (false, Some(file_name)) = (args.no_warehouse, config.warehouse_file_name.as_deref()) {
        let warehouse = SqliteWarehouse::open(&config.data_dir, file_name)
            .context("failed to open warehouse")?;
        finder = finder.with_warehouse(Box::new(warehouse));
    }

    let report = finder
        .run(&source, &store_id)
        .await
        .with_context(|| format!("discovery run for `{store_id}` failed"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn prune(config: &AppConfig, args: PruneArgs) -> anyhow::Result<()> {
    let store_id = args
        .store_id
        .unwrap_or_else(|| config.catalog_store_id.clone());
    let store = FsCatalogStore::new(&config.data_dir);
    let report = prune_store(&store, &store_id, args.date_cutoff)
        .with_context(|| format!("failed to prune `{store_id}`"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
