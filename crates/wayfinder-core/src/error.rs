use thiserror::Error;

/// Application-wide error types for Wayfinder.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// HTTP request failed (non-success status or unreadable body).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded upstream (HTTP 429).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// An upstream response could not be parsed into records.
    #[error("Malformed response from {source_name}: {message}")]
    MalformedResponse {
        source_name: String,
        message: String,
    },

    /// An adapter failed in a way it cannot recover from.
    #[error("Adapter '{source_name}' failed: {message}")]
    AdapterError {
        source_name: String,
        message: String,
    },

    /// A single record failed schema checks.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid job spec or configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The job queue is at capacity.
    #[error("Job queue is full (capacity {0})")]
    QueueFull(usize),

    /// No job with this id is known to the pipeline.
    #[error("Job {0} not found")]
    JobNotFound(uuid::Uuid),

    /// The job was cancelled before it reached a terminal state.
    #[error("Job cancelled")]
    Cancelled,

    /// The pipeline was shut down while the job was still queued.
    #[error("Pipeline shut down before the job ran")]
    ShuttingDown,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Local file could not be read.
    #[error("IO error: {0}")]
    IoError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("reset")
                    || msg.contains("HTTP 5")
            }
            _ => false,
        }
    }

    /// Returns true if this error is an adapter I/O failure that should
    /// reduce the record count rather than fail the job.
    pub fn is_extraction_error(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::RateLimitExceeded
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::IoError(e.to_string())
    }
}
