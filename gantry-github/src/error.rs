//! Error types for the GitHub client

use thiserror::Error;

use gantry_core::ports::AdapterError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the GitHub API
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("GitHub API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Token was rejected or lacks the required permissions
    #[error("authentication rejected (status {status}): {message}")]
    AuthFailed { status: u16, message: String },

    /// GitHub asked us to back off
    #[error("rate limited by GitHub (retry after {retry_after:?} s)")]
    RateLimited { retry_after: Option<u64> },

    /// Resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Failed to parse a response body
    #[error("failed to parse response: {0}")]
    ParseError(String),

    /// The client itself was misconfigured
    #[error("invalid client configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Classify an error status code and message into the right variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::AuthFailed { status, message },
            404 => Self::NotFound(message),
            429 => Self::RateLimited { retry_after: None },
            _ => Self::ApiError { status, message },
        }
    }

    /// Whether retrying this operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::ApiError { status, .. } => *status >= 500,
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthFailed { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Server-requested backoff, if the response carried one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<ClientError> for AdapterError {
    fn from(err: ClientError) -> Self {
        match &err {
            ClientError::AuthFailed { .. } => AdapterError::Auth(err.to_string()),
            ClientError::NotFound(_) => AdapterError::NotFound(err.to_string()),
            e if e.is_transient() => AdapterError::Transient(err.to_string()),
            _ => AdapterError::Fatal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ClientError::from_status(401, "bad token").is_auth());
        assert!(ClientError::from_status(403, "no permission").is_auth());
        assert!(ClientError::from_status(404, "gone").is_not_found());
        assert!(ClientError::from_status(429, "slow down").is_transient());
        assert!(ClientError::from_status(502, "bad gateway").is_transient());
        assert!(!ClientError::from_status(422, "unprocessable").is_transient());
    }

    #[test]
    fn adapter_error_mapping() {
        let err: AdapterError = ClientError::from_status(401, "bad token").into();
        assert!(err.is_auth());

        let err: AdapterError = ClientError::from_status(404, "gone").into();
        assert!(err.is_not_found());

        let err: AdapterError = ClientError::from_status(503, "unavailable").into();
        assert!(matches!(err, AdapterError::Transient(_)));

        let err: AdapterError = ClientError::from_status(422, "unprocessable").into();
        assert!(matches!(err, AdapterError::Fatal(_)));
    }
}
