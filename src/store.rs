use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::errors::{AppError, AppResult};

pub const CATALOG_FILE_NAME: &str = "restaurants.json";
const SNAPSHOT_PREFIX: &str = "restaurants_";
const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Where catalogs live between runs.
pub trait CatalogStore: Send + Sync {
    /// Fails with [`AppError::CatalogNotFound`] when the store has never been written.
    fn read_catalog(&self, store_id: &str) -> AppResult<Catalog>;

    fn write_catalog(&self, store_id: &str, catalog: &Catalog) -> AppResult<()>;

    /// Writes an immutable delta next to the full catalog and returns its location.
    /// `taken_at` is wall-clock time and names the file.
    fn write_snapshot(
        &self,
        store_id: &str,
        new_entries: &Catalog,
        taken_at: NaiveDateTime,
    ) -> AppResult<PathBuf>;
}

/// First runs have nothing to read; start them from an empty catalog.
pub fn load_or_empty(store: &dyn CatalogStore, store_id: &str) -> AppResult<Catalog> {
    match store.read_catalog(store_id) {
        Ok(catalog) => Ok(catalog),
        Err(AppError::CatalogNotFound(id)) => {
            info!(store_id = %id, "no previous catalog; starting empty");
            Ok(Catalog::new())
        }
        Err(err) => Err(err),
    }
}

/// JSON files under `<root>/<store_id>/`.
#[derive(Debug, Clone)]
pub struct FsCatalogStore {
    root: PathBuf,
}

impl FsCatalogStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn store_dir(&self, store_id: &str) -> PathBuf {
        self.root.join(store_id)
    }

    pub fn catalog_path(&self, store_id: &str) -> PathBuf {
        self.store_dir(store_id).join(CATALOG_FILE_NAME)
    }
}

impl CatalogStore for FsCatalogStore {
    fn read_catalog(&self, store_id: &str) -> AppResult<Catalog> {
        let path = self.catalog_path(store_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::CatalogNotFound(store_id.to_string()));
            }
            Err(err) => return Err(AppError::Io(err)),
        };
        let catalog: Catalog = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), entries = catalog.len(), "read catalog");
        Ok(catalog)
    }

    fn write_catalog(&self, store_id: &str, catalog: &Catalog) -> AppResult<()> {
        let path = self.catalog_path(store_id);
        let serialized = serde_json::to_vec_pretty(catalog)?;
        write_atomically(&path, &serialized)?;
        info!(path = %path.display(), entries = catalog.len(), "wrote catalog");
        Ok(())
    }

    fn write_snapshot(
        &self,
        store_id: &str,
        new_entries: &Catalog,
        taken_at: NaiveDateTime,
    ) -> AppResult<PathBuf> {
        let dir = self.store_dir(store_id);
        fs::create_dir_all(&dir)?;
        let serialized = serde_json::to_vec_pretty(new_entries)?;
        let stamp = taken_at.format(SNAPSHOT_TIME_FORMAT).to_string();

        let mut attempt = 0usize;
        loop {
            let name = if attempt == 0 {
                format!("{SNAPSHOT_PREFIX}{stamp}.json")
            } else {
                format!("{SNAPSHOT_PREFIX}{stamp}_{attempt}.json")
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&serialized)?;
                    file.sync_all()?;
                    info!(
                        path = %path.display(),
                        entries = new_entries.len(),
                        "wrote snapshot"
                    );
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    warn!(path = %path.display(), "snapshot already exists; picking another name");
                    attempt += 1;
                }
                Err(err) => return Err(AppError::Io(err)),
            }
        }
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| {
            AppError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no parent directory", path.display()),
            ))
        })?;
    fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{file_name}.tmp"));

    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();
    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(AppError::Io(err));
    }
    Ok(())
}
