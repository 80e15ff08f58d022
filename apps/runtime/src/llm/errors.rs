use std::time::Duration;
use thiserror::Error;

/// Machine-checkable classification of an [`ApiClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Configuration,
    InvalidRequest,
    Network,
    Timeout,
    Http,
    Decode,
}

/// Errors raised by the completion client
#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} ({code}): {message}")]
    Http {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiClientError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            ApiClientError::Configuration(_) => ApiErrorKind::Configuration,
            ApiClientError::InvalidRequest(_) => ApiErrorKind::InvalidRequest,
            ApiClientError::Network(_) => ApiErrorKind::Network,
            ApiClientError::Timeout(_) => ApiErrorKind::Timeout,
            ApiClientError::Http { .. } => ApiErrorKind::Http,
            ApiClientError::Decode(_) => ApiErrorKind::Decode,
        }
    }

    /// HTTP status of a remote rejection
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Stable error code: the remote code for HTTP errors, a fixed code otherwise
    pub fn code(&self) -> &str {
        match self {
            ApiClientError::Configuration(_) => "configuration_error",
            ApiClientError::InvalidRequest(_) => "invalid_request",
            ApiClientError::Network(_) => "network_error",
            ApiClientError::Timeout(_) => "timeout",
            ApiClientError::Http { code, .. } => code,
            ApiClientError::Decode(_) => "decode_error",
        }
    }

    /// Whether another attempt could succeed: transport failures, timeouts,
    /// and HTTP 408, 429 or 5xx
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiClientError::Network(_) | ApiClientError::Timeout(_) => true,
            ApiClientError::Http { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

impl From<reqwest::Error> for ApiClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiClientError::Decode(e.to_string())
        } else {
            ApiClientError::Network(e.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiClientError>;
