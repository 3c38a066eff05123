//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key not found.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Key already exists.
    #[error("key exists already: {0}")]
    KeyExists(String),

    /// A lock protecting the store was poisoned by a panicking thread.
    #[error("store lock poisoned")]
    Poisoned,
}
