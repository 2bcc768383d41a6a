//! Error types for relcache
//!
//! One taxonomy for the whole cache engine: schema validation, query
//! building, storage, remote fetch and rebuild arbitration.

use crate::fetch::RemoteSourceError;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// A table or column name is empty or all-whitespace
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The supplied schema is not a mapping of entity -> field list
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A filter set references no column of the active schema
    #[error("No matching columns found in the schema")]
    NoMatchingColumns,

    /// A rebuild is in flight; readers and further updates are rejected
    #[error("Rebuild in progress")]
    RebuildInProgress,

    /// Remote fetch failure, carrying the remote's status/text/reason
    #[error("Remote source error: {0}")]
    Remote(RemoteSourceError),

    /// Database/storage errors with context
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::InvalidIdentifier("identifier cannot be empty".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid identifier: identifier cannot be empty"
        );
    }

    #[test]
    fn test_error_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cache_error = CacheError::from(io_error);

        match cache_error {
            CacheError::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }
}
