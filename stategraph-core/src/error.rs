use stategraph_scanner::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Sink already closed: {0}")]
    Closed(String),
}

impl From<StoreError> for ScanError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Scan(inner) => inner,
            other => ScanError::Persistence(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
