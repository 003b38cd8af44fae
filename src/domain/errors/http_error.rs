//! Request/response API error types.

use thiserror::Error;

/// HTTP API error variants.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum HttpError {
    #[error("token rejected by the API: {message}")]
    Unauthorized { message: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("failed to decode response: {message}")]
    InvalidResponse { message: String },

    #[error("invalid base url: {message}")]
    InvalidUrl { message: String },
}

impl HttpError {
    /// Creates unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unexpected_status(status: u16, message: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns whether a later attempt may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::NetworkError { .. } => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500,
            Self::Unauthorized { .. } | Self::InvalidResponse { .. } | Self::InvalidUrl { .. } => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(HttpError::network("reset").is_recoverable());
        assert!(HttpError::RateLimited { retry_after_ms: 10 }.is_recoverable());
        assert!(HttpError::unexpected_status(502, "bad gateway").is_recoverable());
        assert!(!HttpError::unexpected_status(404, "missing").is_recoverable());
        assert!(!HttpError::unauthorized("401").is_recoverable());
    }
}
