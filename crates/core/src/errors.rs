//! Error types shared across the sync engine and its collaborators.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Retry policy class for remote-call failures.
///
/// Non-auth 4xx responses are retried the same way as 5xx: the queue layer
/// does not distinguish permanently-invalid payloads from transient
/// rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRetryClass {
    Retryable,
    ReauthRequired,
}

/// Failure of a single remote call, as normalized by the transport.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Connection-level failure (DNS, refused, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No usable credential, or the remote rejected the one we sent.
    #[error("authentication error: {0}")]
    Auth(String),
}

impl TransportError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP status if this failure carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify this failure for retry bookkeeping.
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

/// Errors surfaced by the sync engine.
///
/// Variants carry owned strings so the type stays `Clone`: pass results are
/// distributed through shared futures and channels.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Local persistence failure. Fatal to the current pass, since silently
    /// dropping a queue mutation would be a data-loss bug.
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No item in the batch can succeed without a credential, so the whole
    /// pass fails at once.
    #[error("authentication required: {0}")]
    Auth(String),

    #[error("conflict error: {0}")]
    Conflict(String),

    #[error("audit log error: {0}")]
    Audit(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_server_errors_is_retryable() {
        assert_eq!(
            TransportError::api(500, "boom").retry_class(),
            SyncRetryClass::Retryable
        );
        assert_eq!(
            TransportError::api(429, "slow down").retry_class(),
            SyncRetryClass::Retryable
        );
    }

    #[test]
    fn retry_class_treats_validation_rejections_as_retryable() {
        assert_eq!(
            TransportError::api(422, "bad payload").retry_class(),
            SyncRetryClass::Retryable
        );
    }

    #[test]
    fn retry_class_for_auth_is_reauth() {
        assert_eq!(
            TransportError::api(401, "unauthorized").retry_class(),
            SyncRetryClass::ReauthRequired
        );
        assert_eq!(
            TransportError::Auth("no token".into()).retry_class(),
            SyncRetryClass::ReauthRequired
        );
    }
}
