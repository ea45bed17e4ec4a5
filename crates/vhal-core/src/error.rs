//! Transport layer errors

use thiserror::Error;

use crate::models::StatusCode;

/// Errors returned by transport calls
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The service rejected the request with a status code
    #[error("Service returned {0}")]
    Status(StatusCode),
}

impl TransportError {
    /// Status code this failure is surfaced as
    pub fn status_code(&self) -> StatusCode {
        match self {
            TransportError::ConnectionFailed(_) | TransportError::ConnectionClosed => {
                StatusCode::TRY_AGAIN
            }
            TransportError::SendFailed(_) => StatusCode::INTERNAL_ERROR,
            TransportError::Status(code) => *code,
        }
    }
}
