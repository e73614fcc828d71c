//! Error types for the persistence layer.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing inventory data.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid literal at offset {offset}: {message}")]
    Literal { offset: usize, message: String },

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("Unsupported meta version: {0}")]
    UnsupportedVersion(String),

    #[error("Gzip error: {0}")]
    Gzip(#[source] std::io::Error),
}

impl StoreError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        StoreError::Malformed(message.into())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
