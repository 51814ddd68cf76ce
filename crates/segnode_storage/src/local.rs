//! Blob store backed by a local directory tree.

use crate::blob::BlobStore;
use crate::error::{StorageError, StorageResult};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

/// A blob store that maps object paths onto files below a root directory.
///
/// Object paths use `/` separators and are always relative to the root;
/// absolute paths and `..` components are rejected. This is the layout a
/// node sees when the object store is mounted or mirrored locally.
///
/// # Thread Safety
///
/// Every read opens its own file handle, so concurrent readers never
/// contend on a shared cursor.
///
/// # Example
///
/// ```no_run
/// use segnode_storage::{BlobStore, LocalBlobStore};
/// use std::path::Path;
///
/// let store = LocalBlobStore::open(Path::new("/var/lib/segnode/blobs")).unwrap();
/// let bytes = store.read_at("insert_log/1/2/100/0", 0, 512).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `data` as the object at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the write fails.
    pub fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, data)?;
        Ok(())
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn open_object(&self, path: &str) -> StorageResult<File> {
        let full = self.resolve(path)?;
        File::open(&full).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::not_found(path)
            } else {
                StorageError::Io(err)
            }
        })
    }
}

impl BlobStore for LocalBlobStore {
    fn read_at(&self, path: &str, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut file = self.open_object(path)?;
        let size = file.metadata()?.len();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd {
                path: path.to_string(),
                offset,
                len,
                size,
            });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let mut file = self.open_object(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self, path: &str) -> StorageResult<u64> {
        Ok(self.open_object(path)?.metadata()?.len())
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.resolve(path)?.is_file())
    }
}
