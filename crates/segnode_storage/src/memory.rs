//! In-memory blob store.

use crate::blob::BlobStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// An in-memory blob store.
///
/// Objects live in a path-keyed map. Suitable for:
/// - Unit and integration tests
/// - Nodes that stage binlogs in memory
///
/// The store counts ranged and whole-object reads so tests can assert how
/// much remote traffic an operation caused.
///
/// # Example
///
/// ```rust
/// use segnode_storage::{BlobStore, InMemoryBlobStore};
///
/// let store = InMemoryBlobStore::new();
/// store.put("a", vec![1, 2, 3, 4]);
/// assert_eq!(store.read_at("a", 1, 2).unwrap(), vec![2, 3]);
/// assert_eq!(store.ranged_reads(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    ranged_reads: AtomicU64,
    full_reads: AtomicU64,
    last_range: RwLock<Option<(String, u64, usize)>>,
}

impl InMemoryBlobStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` at `path`, replacing any existing object.
    pub fn put(&self, path: impl Into<String>, data: Vec<u8>) {
        self.objects.write().insert(path.into(), data);
    }

    /// Removes the object at `path`, returning it if present.
    pub fn remove(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.write().remove(path)
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if no objects are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Number of successful `read_at` calls served.
    #[must_use]
    pub fn ranged_reads(&self) -> u64 {
        self.ranged_reads.load(Ordering::Relaxed)
    }

    /// Number of successful whole-object `read` calls served.
    #[must_use]
    pub fn full_reads(&self) -> u64 {
        self.full_reads.load(Ordering::Relaxed)
    }

    /// The `(path, offset, len)` of the most recent successful ranged read.
    #[must_use]
    pub fn last_range(&self) -> Option<(String, u64, usize)> {
        self.last_range.read().clone()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn read_at(&self, path: &str, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let objects = self.objects.read();
        let data = objects
            .get(path)
            .ok_or_else(|| StorageError::not_found(path))?;
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd {
                path: path.to_string(),
                offset,
                len,
                size,
            });
        }

        let start = offset as usize;
        let bytes = data[start..start + len].to_vec();
        drop(objects);

        self.ranged_reads.fetch_add(1, Ordering::Relaxed);
        *self.last_range.write() = Some((path.to_string(), offset, len));
        Ok(bytes)
    }

    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let data = self
            .objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::not_found(path))?;
        self.full_reads.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    fn size(&self, path: &str) -> StorageResult<u64> {
        self.objects
            .read()
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::not_found(path))
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.objects.read().contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryBlobStore::new();
        assert!(store.is_empty());
        assert!(!store.exists("missing").unwrap());
    }

    #[test]
    fn memory_read_at_returns_range() {
        let store = InMemoryBlobStore::new();
        store.put("log", b"hello world".to_vec());

        assert_eq!(store.read_at("log", 0, 5).unwrap(), b"hello");
        assert_eq!(store.read_at("log", 6, 5).unwrap(), b"world");
        assert_eq!(store.ranged_reads(), 2);
        assert_eq!(store.last_range(), Some(("log".to_string(), 6, 5)));
    }

    #[test]
    fn memory_read_whole_object() {
        let store = InMemoryBlobStore::new();
        store.put("log", vec![9; 16]);

        assert_eq!(store.read("log").unwrap(), vec![9; 16]);
        assert_eq!(store.full_reads(), 1);
        assert_eq!(store.size("log").unwrap(), 16);
    }

    #[test]
    fn memory_missing_object_fails() {
        let store = InMemoryBlobStore::new();
        let err = store.read_at("nope", 0, 1).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.read("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn memory_read_past_end_fails() {
        let store = InMemoryBlobStore::new();
        store.put("log", b"hello".to_vec());

        let result = store.read_at("log", 3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
        let result = store.read_at("log", 10, 0);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
        assert_eq!(store.ranged_reads(), 0);
    }

    #[test]
    fn memory_empty_read_at_end() {
        let store = InMemoryBlobStore::new();
        store.put("log", b"hello".to_vec());
        assert!(store.read_at("log", 5, 0).unwrap().is_empty());
    }

    #[test]
    fn memory_put_replaces_and_remove() {
        let store = InMemoryBlobStore::new();
        store.put("log", vec![1]);
        store.put("log", vec![2, 3]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove("log"), Some(vec![2, 3]));
        assert!(store.is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn ranged_read_matches_slice(
                data in prop::collection::vec(any::<u8>(), 0..256),
                a in 0usize..256,
                b in 0usize..256,
            ) {
                let store = InMemoryBlobStore::new();
                store.put("obj", data.clone());
                let (start, end) = if a <= b { (a, b) } else { (b, a) };

                let result = store.read_at("obj", start as u64, end - start);
                if end <= data.len() {
                    prop_assert_eq!(result.unwrap(), data[start..end].to_vec());
                } else {
                    let is_past_end = matches!(result, Err(StorageError::ReadPastEnd { .. }));
                    prop_assert!(is_past_end);
                }
            }
        }
    }
}
