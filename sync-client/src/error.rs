//! Error types for sync-client.

use sync_types::SyncError;

/// Main error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Remote or sync-level failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Local persistence failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// No actor session is active.
    #[error("not initialized: no active identity")]
    NotInitialized,

    /// The caller passed an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// The sync-level error, if this is one.
    pub fn as_sync(&self) -> Option<&SyncError> {
        match self {
            ClientError::Sync(err) => Some(err),
            _ => None,
        }
    }
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A value could not be encoded or decoded.
    #[error("encoding error for key {key}: {source}")]
    Encoding {
        /// Key being read or written.
        key: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Backend-specific failure (also used by injected test failures).
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
