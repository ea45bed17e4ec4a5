//! Client error taxonomy

use thiserror::Error;
use vhal_core::{PropertyKey, StatusCode, TransportError, ValueType};

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by every facade call
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    /// Operation attempted outside the Ready state. Wait for Ready and retry.
    #[error("Property service not ready")]
    NotReady,

    /// No reply within the request deadline
    #[error("Request timed out")]
    Timeout,

    /// Service or hardware reported a failure, surfaced verbatim
    #[error("Transport error: {0}")]
    TransportError(StatusCode),

    /// Value tag does not match the property's declared type
    #[error("Invalid value: expected {expected}, got {actual}")]
    InvalidValue {
        expected: ValueType,
        actual: ValueType,
    },

    /// The property exists but has no current value for the area
    #[error("Property {0} unavailable")]
    Unavailable(PropertyKey),
}

impl ClientError {
    /// Unavailable is a valid answer rather than a failure for most callers
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::Unavailable(_))
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::NotReady | ClientError::Timeout => true,
            ClientError::TransportError(code) => *code == StatusCode::TRY_AGAIN,
            ClientError::InvalidValue { .. } | ClientError::Unavailable(_) => false,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::TransportError(err.status_code())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
