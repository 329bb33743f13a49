//! Error types for the key-value layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == KV Error Enum ==
/// Unified error type for stores, caches and the array layer.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum KvError {
    /// Add-only write hit an existing key, pair or value
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation is not valid for the store's value type
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Malformed path, empty search term, bad identifier and similar
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Store was busy or locked and stayed that way through every retry
    #[error("Store busy: {0}")]
    Transient(String),

    /// Any other durable-store failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Connection pool could not hand out a connection
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KvError {
    /// Returns true for errors worth retrying after a short delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, KvError::Transient(_))
    }
}

// == Backend Conversions ==
impl From<rusqlite::Error> for KvError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                KvError::Transient(err.to_string())
            }
            _ => KvError::Backend(err.to_string()),
        }
    }
}

impl From<tokio_postgres::Error> for KvError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.code() {
            Some(state) if *state == tokio_postgres::error::SqlState::UNIQUE_VIOLATION => {
                KvError::AlreadyExists(err.to_string())
            }
            _ => KvError::Backend(err.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for KvError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(inner) => KvError::from(inner),
            other => KvError::Pool(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for KvError {
    fn from(err: tokio::task::JoinError) -> Self {
        KvError::Backend(format!("blocking task failed: {}", err))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the key-value layer.
pub type Result<T> = std::result::Result<T, KvError>;

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_sqlite_error_is_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let kv: KvError = err.into();
        assert!(kv.is_transient());
    }

    #[test]
    fn test_other_sqlite_error_is_backend() {
        let kv: KvError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(kv, KvError::Backend(_)));
        assert!(!kv.is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = KvError::AlreadyExists("key \"a\"".to_string());
        assert_eq!(err.to_string(), "Already exists: key \"a\"");

        let err = KvError::InvalidArgument("prefix cannot be empty".to_string());
        assert_eq!(err.to_string(), "Invalid argument: prefix cannot be empty");
    }
}
