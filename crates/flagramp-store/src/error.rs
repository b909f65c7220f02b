//! Error types for the state store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("lock acquisition timed out after {waited_ms} ms: {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },
}
