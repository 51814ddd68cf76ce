//! Error types for segnode core.

use crate::types::UniqueId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in segment operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The segment has been destroyed.
    #[error("segment {segment_id} is unhealthy")]
    Unhealthy {
        /// The destroyed segment.
        segment_id: UniqueId,
    },

    /// Operation not permitted for the segment's current type or state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the violated precondition.
        message: String,
    },

    /// The native engine reported a non-zero status.
    #[error("{operation} failed, error code = {code}, error msg = {message}")]
    Engine {
        /// The engine operation that failed, e.g. `Search`.
        operation: &'static str,
        /// Engine status code.
        code: i32,
        /// Engine status message.
        message: String,
    },

    /// Caller-supplied input is malformed.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the problem.
        message: String,
    },

    /// Blob store error.
    #[error("storage error: {0}")]
    Storage(#[from] segnode_storage::StorageError),

    /// Wire codec error.
    #[error("codec error: {0}")]
    Codec(#[from] segnode_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Hydrating a field from remote storage failed.
    #[error("hydration of {path} failed: {message}")]
    Hydration {
        /// The binlog being read.
        path: String,
        /// Description of the failure.
        message: String,
    },

    /// Unrecoverable schema/code mismatch.
    #[error("fatal: {message}")]
    Fatal {
        /// Description of the mismatch.
        message: String,
    },

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A dispatch pool has shut down.
    #[error("dispatch pool {pool} is closed")]
    PoolClosed {
        /// Pool name.
        pool: &'static str,
    },

    /// No indexed field info is registered for the field.
    #[error("field {field_id} not found in indexed field infos")]
    FieldNotFound {
        /// The requested field.
        field_id: i64,
    },

    /// A retrieve result exceeded the configured output bound.
    #[error("retrieve output of {size} bytes exceeds limit of {limit} bytes")]
    OutputTooLarge {
        /// Produced output size.
        size: i64,
        /// Configured bound.
        limit: i64,
    },
}

impl CoreError {
    /// Creates an unhealthy-segment error.
    pub const fn unhealthy(segment_id: UniqueId) -> Self {
        Self::Unhealthy { segment_id }
    }

    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates an engine failure error.
    pub fn engine(operation: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self::Engine {
            operation,
            code,
            message: message.into(),
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a hydration error.
    pub fn hydration(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hydration {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Returns true for the unrecoverable class.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Returns true if the segment was found destroyed.
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy { .. })
    }
}
