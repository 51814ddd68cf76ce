//! Error types for blob store operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading from a blob store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No object exists at the requested path.
    #[error("object not found: {path}")]
    NotFound {
        /// The requested path.
        path: String,
    },

    /// Attempted to read beyond the end of an object.
    #[error("read beyond end of object {path}: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The object path.
        path: String,
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The object size.
        size: u64,
    },

    /// The path is empty or escapes the store root.
    #[error("invalid object path: {path:?}")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Returns true if the error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
