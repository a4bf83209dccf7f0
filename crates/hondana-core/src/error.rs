use thiserror::Error;

/// Application-wide error types for Hondana.
#[derive(Error, Debug)]
pub enum AppError {
    /// The headless browser process could not be started.
    #[error("Browser launch failed: {0}")]
    LaunchFailure(String),

    /// A page did not reach its target or the readiness selector never appeared.
    #[error("Navigation to {url} failed: {message}")]
    NavigationFailure { url: String, message: String },

    /// Adapter extraction logic failed.
    #[error("Extraction failed for source {source_id} ({target}): {message}")]
    ExtractionFailure {
        source_id: String,
        target: String,
        message: String,
    },

    /// The adapter does not provide this operation.
    #[error("{operation} not implemented for source with id {source_id}")]
    NotImplemented {
        source_id: String,
        operation: &'static str,
    },

    /// No adapter is registered under this id.
    #[error("Source does not exist: {0}")]
    UnknownSource(String),

    /// File cache I/O failed (anything other than "not found").
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    /// Structured cache operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error came from one of the caches rather than
    /// from the browser or an adapter.
    pub fn is_cache_failure(&self) -> bool {
        matches!(self, AppError::CacheIo(_) | AppError::DatabaseError(_))
    }

    pub(crate) fn cache_io(path: &std::path::Path, err: std::io::Error) -> Self {
        AppError::CacheIo(format!("{}: {err}", path.display()))
    }
}
