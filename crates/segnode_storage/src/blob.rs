//! Blob store trait definition.

use crate::error::StorageResult;

/// A read-only view of the remote object store holding binlog files.
///
/// Blob stores are **opaque byte stores** addressed by path. They know
/// nothing about binlog layout, field types or row offsets; the hydrator in
/// `segnode_core` owns all interpretation.
///
/// # Invariants
///
/// - `read_at(path, offset, len)` returns exactly `len` bytes or an error
/// - `read` returns the whole object
/// - Stores must be `Send + Sync`: dispatch workers and query threads
///   read concurrently
pub trait BlobStore: Send + Sync {
    /// Reads `len` bytes of the object at `path`, starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The object does not exist
    /// - The requested range extends beyond the object
    /// - An I/O error occurs
    fn read_at(&self, path: &str, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads the whole object at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist or cannot be read.
    fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Returns the size of the object at `path` in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    fn size(&self, path: &str) -> StorageResult<u64>;

    /// Returns whether an object exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self, path: &str) -> StorageResult<bool>;
}

impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    fn read_at(&self, path: &str, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        (**self).read_at(path, offset, len)
    }

    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        (**self).read(path)
    }

    fn size(&self, path: &str) -> StorageResult<u64> {
        (**self).size(path)
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        (**self).exists(path)
    }
}
