//! # segnode storage
//!
//! Remote blob store contract for segnode.
//!
//! Query nodes never own the object store. They only read binlog objects
//! back, either by byte range (fixed-width columns) or whole (serialized
//! arrays). This crate defines that read contract and ships two stores:
//!
//! - [`InMemoryBlobStore`] - For tests and ephemeral deployments
//! - [`LocalBlobStore`] - Objects laid out as files under a root directory
//!
//! ## Example
//!
//! ```rust
//! use segnode_storage::{BlobStore, InMemoryBlobStore};
//!
//! let store = InMemoryBlobStore::new();
//! store.put("binlog/100/1", b"hello world".to_vec());
//! let data = store.read_at("binlog/100/1", 6, 5).unwrap();
//! assert_eq!(&data, b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod error;
mod local;
mod memory;

pub use blob::BlobStore;
pub use error::{StorageError, StorageResult};
pub use local::LocalBlobStore;
pub use memory::InMemoryBlobStore;
