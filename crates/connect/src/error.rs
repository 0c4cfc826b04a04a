//! Error types for the connect crate.

use glucolog_core::errors::{SyncRetryClass, TransportError};
use thiserror::Error;

/// Result type alias for connect operations.
pub type Result<T> = std::result::Result<T, ConnectError>;

/// Errors that can occur while talking to the cloud API.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the cloud service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or invalid token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ConnectError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy. Non-auth 4xx stays retryable: the
    /// queue layer does not special-case validation rejections.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self {
            Self::Api { status, .. } if matches!(status, 401 | 403) => {
                SyncRetryClass::ReauthRequired
            }
            Self::Auth(_) => SyncRetryClass::ReauthRequired,
            _ => SyncRetryClass::Retryable,
        }
    }
}

impl From<ConnectError> for TransportError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Api { status, message } => TransportError::Api { status, message },
            ConnectError::Auth(message) => TransportError::Auth(message),
            ConnectError::Http(inner) => TransportError::Network(inner.to_string()),
            other => TransportError::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_auth_statuses_is_reauth() {
        assert_eq!(
            ConnectError::api(401, "unauthorized").retry_class(),
            SyncRetryClass::ReauthRequired
        );
        assert_eq!(
            ConnectError::api(403, "forbidden").retry_class(),
            SyncRetryClass::ReauthRequired
        );
    }

    #[test]
    fn retry_class_for_everything_else_is_retryable() {
        assert_eq!(
            ConnectError::api(500, "boom").retry_class(),
            SyncRetryClass::Retryable
        );
        assert_eq!(
            ConnectError::api(422, "bad payload").retry_class(),
            SyncRetryClass::Retryable
        );
    }

    #[test]
    fn conversion_preserves_api_status() {
        let err: TransportError = ConnectError::api(503, "unavailable").into();
        assert_eq!(err.status_code(), Some(503));
    }
}
