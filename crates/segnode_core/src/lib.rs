//! # segnode core
//!
//! Segment management for a vector query node.
//!
//! A [`Segment`] wraps one native engine handle (growing or sealed) and
//! everything the node keeps around it:
//!
//! - Lifecycle: creation, the growing-to-sealed re-tag, health, destruction
//! - Deletes: a pre-flush tombstone buffer, timestamp ordering and a
//!   watermark that drops re-delivered records
//! - Existence: bloom filter generations answering "may this key be here"
//! - Dispatch: every engine call runs on a bounded worker pool
//!   ([`DispatchPools`]), timed into per-operation latency histograms
//! - Hydration: retrieve output for indexed vector fields without raw data
//!   is filled from binlogs in a [`segnode_storage::BlobStore`]
//!
//! The engine itself sits behind [`engine::SegmentEngine`];
//! [`engine::memory`] provides an in-process implementation.
//!
//! ## Usage
//!
//! ```
//! use segnode_codec::{CollectionSchema, DataType, FieldSchema};
//! use segnode_core::engine::memory::MemoryEngineFactory;
//! use segnode_core::{Config, PrimaryKey, Segment, SegmentMeta, SegmentRuntime, SegmentType};
//! use std::sync::Arc;
//!
//! let schema = Arc::new(CollectionSchema::new(
//!     "docs",
//!     vec![
//!         FieldSchema::scalar(100, "pk", DataType::Int64).primary(),
//!         FieldSchema::vector(101, "vec", DataType::FloatVector, 4),
//!     ],
//! ));
//! let runtime = Arc::new(
//!     SegmentRuntime::new(Config::new(), Arc::new(MemoryEngineFactory::new())).unwrap(),
//! );
//! let segment = Segment::new(runtime, schema, SegmentMeta::new(1, 2, 3), SegmentType::Growing)
//!     .unwrap();
//!
//! segment.update_bloom_filter(&[PrimaryKey::Int64(42)]).unwrap();
//! assert!(segment.is_pk_exist(&PrimaryKey::Int64(42)));
//!
//! segment.destroy();
//! assert_eq!(segment.row_count(), -1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod binlog;
pub mod bloom;
pub mod config;
pub mod delete_buffer;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hydrate;
pub mod metrics;
pub mod pk_stats;
pub mod segment;
pub mod types;

pub use binlog::{Binlog, FieldBinlog, FieldIndexInfo, IndexedFieldInfo};
pub use bloom::BloomFilter;
pub use config::{Config, PoolConfig};
pub use dispatch::{CancelHandle, DispatchPools, QueryContext};
pub use error::{CoreError, CoreResult};
pub use pk_stats::PkStatistics;
pub use segment::{Segment, SegmentMeta, SegmentRuntime};
pub use types::{Endian, FieldId, MsgPosition, PrimaryKey, SegmentType, Timestamp, UniqueId};
