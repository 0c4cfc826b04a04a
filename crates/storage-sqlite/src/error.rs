//! Storage error mapping.

use thiserror::Error;

/// Errors raised by the sqlite-backed stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A persisted row no longer round-trips into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<StorageError> for glucolog_core::Error {
    fn from(err: StorageError) -> Self {
        glucolog_core::Error::Storage(err.to_string())
    }
}
