//! Error types for calmirror.

use thiserror::Error;

/// Errors that can occur while mirroring a feed into a destination calendar.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to fetch: {0}")]
    Fetch(String),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Destination rejected credentials: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient API error: {0}")]
    Transient(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the mutation that produced this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RateLimited(_) | SyncError::Transient(_))
    }

    /// Failures while reading are reported as fetch failures; the pass aborts either way.
    pub fn into_read_failure(self) -> SyncError {
        match self {
            SyncError::RateLimited(msg) | SyncError::Transient(msg) => SyncError::Fetch(msg),
            other => other,
        }
    }
}

/// Result type alias for calmirror operations.
pub type SyncResult<T> = Result<T, SyncError>;
