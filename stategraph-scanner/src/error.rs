use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timed out after {0:?}: {1}")]
    Timeout(Duration, String),

    #[error("Element unavailable: {0}")]
    ElementUnavailable(String),

    #[error("Navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser session closed: {0}")]
    SessionClosed(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// The browser, context or page was torn down underneath us. The crawl
    /// treats this as a stop signal rather than a failure.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, ScanError::SessionClosed(_))
    }

    /// Errors local to one candidate or interaction. They are logged and the
    /// candidate is skipped.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScanError::Timeout(..)
                | ScanError::ElementUnavailable(_)
                | ScanError::Navigation { .. }
                | ScanError::HttpError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
