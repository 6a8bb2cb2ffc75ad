use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use tracing::info;

use crate::catalog::Catalog;
use crate::errors::{AppError, AppResult};

pub const RESTAURANTS_TABLE: &str = "restaurants";

/// Tabular destination the merged catalog is forwarded to after a run.
pub trait WarehouseSink {
    /// Replaces the table contents with `catalog`, returning the rows written.
    fn replace_all(&mut self, catalog: &Catalog) -> AppResult<usize>;
}

pub struct SqliteWarehouse {
    connection: Connection,
    path: PathBuf,
}

impl SqliteWarehouse {
    pub fn open<P: AsRef<Path>>(data_dir: P, file_name: &str) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(file_name);
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let connection = Connection::open_with_flags(&path, flags)?;
        connection.execute_batch("PRAGMA journal_mode = WAL;")?;
        run_migrations(&connection)?;
        info!(target: "warehouse", path = %path.display(), "warehouse opened");
        Ok(Self { connection, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn row_count(&self) -> AppResult<usize> {
        let count: i64 = self.connection.query_row(
            &format!("SELECT COUNT(*) FROM {RESTAURANTS_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl WarehouseSink for SqliteWarehouse {
    fn replace_all(&mut self, catalog: &Catalog) -> AppResult<usize> {
        let loaded_at = Utc::now().to_rfc3339();
        let tx = self.connection.transaction()?;
        tx.execute(&format!("DELETE FROM {RESTAURANTS_TABLE}"), [])?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {RESTAURANTS_TABLE} (
                    restaurant_id, display_name, short_formatted_address, rating,
                    price_level, last_seen, first_seen, primary_type,
                    user_rating_count, types, loaded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ))?;
            for (id, entry) in catalog.iter() {
                let types = serde_json::to_string(&entry.types)?;
                let rating_count = i64::try_from(entry.user_rating_count).map_err(|_| {
                    AppError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "user rating count {} for {id} does not fit the warehouse column",
                            entry.user_rating_count
                        ),
                    ))
                })?;
                insert.execute(params![
                    id,
                    entry.display_name,
                    entry.short_formatted_address,
                    entry.rating,
                    entry.price_level,
                    entry.last_seen.to_string(),
                    entry.first_seen.to_string(),
                    entry.primary_type,
                    rating_count,
                    types,
                    loaded_at,
                ])?;
            }
        }
        tx.commit()?;
        info!(
            target: "warehouse",
            path = %self.path.display(),
            rows = catalog.len(),
            "warehouse table replaced"
        );
        Ok(catalog.len())
    }
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {RESTAURANTS_TABLE} (
            restaurant_id TEXT PRIMARY KEY,
            display_name TEXT,
            short_formatted_address TEXT,
            rating REAL,
            price_level TEXT,
            last_seen TEXT,
            first_seen TEXT,
            primary_type TEXT,
            user_rating_count INTEGER,
            types TEXT,
            loaded_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_restaurants_last_seen ON {RESTAURANTS_TABLE}(last_seen);
        "#
    ))?;
    Ok(())
}
