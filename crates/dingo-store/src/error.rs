//! Error types for the document store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The data directory could not be created.
    #[error("failed to create data directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Another open store, usually another process, holds the file.
    #[error("document store {} is locked by another process", path.display())]
    Locked { path: PathBuf },

    /// The lock file could not be opened or locked.
    #[error("failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The backing file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The backing file is not a valid store document.
    #[error("corrupt document store {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Writing the backing file failed. The in-memory state still holds the
    /// change and will be written by the next successful flush.
    #[error("failed to persist document store to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store has been closed.
    #[error("document store is closed")]
    Closed,
}
