use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Instagram API error: {0}")]
    InstagramApi(#[from] InstagramApiError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum InstagramApiError {
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("Upstream unavailable (status: {status_code:?})")]
    Unavailable { status_code: Option<u16> },

    #[error("No API credentials configured")]
    Unconfigured,

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding model unavailable: {path}")]
    ModelUnavailable { path: String },

    #[error("Tokenization failed: {details}")]
    TokenizationFailed { details: String },

    #[error("Model inference failed: {reason}")]
    InferenceFailed { reason: String },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

pub trait ErrorExt {
    /// Whether a failed operation may be re-attempted.
    fn is_retryable(&self) -> bool;
    /// Server-provided or inferred wait before the next attempt.
    fn retry_after(&self) -> Option<Duration>;
}

impl ErrorExt for InstagramApiError {
    fn is_retryable(&self) -> bool {
        match self {
            InstagramApiError::RateLimited { .. } => true,
            InstagramApiError::Unavailable { .. } => true,
            InstagramApiError::RequestTimeout => true,
            InstagramApiError::NotFound { .. } => false,
            InstagramApiError::Unconfigured => false,
            InstagramApiError::InvalidResponse { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            InstagramApiError::RateLimited { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }
}

impl ErrorExt for CoreError {
    fn is_retryable(&self) -> bool {
        match self {
            CoreError::InstagramApi(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::InstagramApi(e) => e.retry_after(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_terminal() {
        let err = InstagramApiError::NotFound {
            resource: "nosuchuser".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.retry_after().is_none());
    }

    #[test]
    fn rate_limited_carries_wait_hint() {
        let err = InstagramApiError::RateLimited { retry_after: 30 };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn unconfigured_is_fatal() {
        let err = CoreError::from(InstagramApiError::Unconfigured);
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = InstagramApiError::Unavailable {
            status_code: Some(503),
        };
        assert!(err.is_retryable());
    }
}
