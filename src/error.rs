use std::sync::Arc;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, VideoError>;

/// Error taxonomy for the video pipeline
///
/// Errors are `Clone` so that concurrent cache waiters can all receive the
/// same failure from a single producer invocation.
#[derive(thiserror::Error, Debug, Clone)]
pub enum VideoError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{backend} rate limited: {message}")]
    RateLimited { backend: String, message: String },

    #[error("Network error from {backend}: {message}")]
    Network { backend: String, message: String },

    #[error("{backend} is unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("Invalid response from {backend}: {message}")]
    Validation { backend: String, message: String },

    #[error("Narration synthesis failed: {0}")]
    Synthesis(String),

    #[error("Video assembly failed: {0}")]
    Assembly(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Pipeline failed: {0}")]
    Pipeline(String),

    #[error("File operation failed: {0}")]
    File(Arc<std::io::Error>),
}

impl VideoError {
    /// Whether a retry with backoff may succeed
    ///
    /// Rate limits and transient network failures (including per-attempt
    /// timeouts, which are reported as `Network`) are worth retrying;
    /// everything else either triggers the fallback chain or is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VideoError::RateLimited { .. } | VideoError::Network { .. }
        )
    }

    /// Classify a transport error from a backend call
    pub fn from_request(backend: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            VideoError::Network {
                backend: backend.to_string(),
                message: err.to_string(),
            }
        } else {
            VideoError::BackendUnavailable {
                backend: backend.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Classify a non-success HTTP status from a backend call
    pub fn from_status(backend: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        match status.as_u16() {
            429 => VideoError::RateLimited {
                backend: backend.to_string(),
                message,
            },
            401 | 403 => VideoError::Configuration(format!("{backend} rejected credentials: {message}")),
            500..=599 => VideoError::Network {
                backend: backend.to_string(),
                message,
            },
            _ => VideoError::BackendUnavailable {
                backend: backend.to_string(),
                message,
            },
        }
    }
}

impl From<std::io::Error> for VideoError {
    fn from(err: std::io::Error) -> Self {
        VideoError::File(Arc::new(err))
    }
}
