use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Config(String),
    #[error("invalid coordinate source: {0}")]
    Coordinates(String),
    #[error("no catalog found for store `{0}`")]
    CatalogNotFound(String),
    #[error("nearby search failed: {0}")]
    Places(String),
}

impl AppError {
    /// Whether a failed nearby search is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Http(err) => match err.status() {
                Some(status) => status.as_u16() == 429 || status.is_server_error(),
                None => true,
            },
            AppError::Json(_) | AppError::Places(_) => true,
            _ => false,
        }
    }
}
