//! Gjallarhorn error types

/// Gjallarhorn error types
#[derive(Debug, thiserror::Error)]
pub enum GjallarhornError {
    // Origin/network errors
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Document downloaded fine but cannot serve as a datafile
    /// (missing or non-numeric `revision` field).
    #[error("invalid datafile: {0}")]
    InvalidDocument(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    /// Batch operation name not present in the method registry.
    /// Reported per-key inside a batch response, never aborts siblings.
    #[error("method is not defined: {0}")]
    UnknownOperation(String),

    #[error("engine instantiation failed: {0}")]
    Instantiation(String),

    // Fan-out channel errors
    #[error("transport error: {0}")]
    Transport(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for GjallarhornError {
    fn from(err: reqwest::Error) -> Self {
        GjallarhornError::Fetch(err.to_string())
    }
}

/// Result type alias for Gjallarhorn operations
pub type Result<T> = std::result::Result<T, GjallarhornError>;
