//! # segnode testkit
//!
//! Test utilities for segnode.
//!
//! This crate provides:
//! - Node and segment fixtures backed by the in-memory engine
//! - Binlog writers for sealed-segment loading and hydration tests
//! - Property-based generators for keys, timestamps and delete batches
//! - A concurrency stress harness
//! - Log capture setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use segnode_testkit::prelude::*;
//!
//! let node = TestNode::new();
//! let segment = node.growing_segment(1);
//! insert_rows(&segment, &[1, 2, 3], &[10, 11, 12]);
//! assert_eq!(segment.row_count(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

use std::sync::Once;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_test_logging;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;

static LOGGING: Once = Once::new();

/// Routes `tracing` output to the test writer.
///
/// The filter comes from `RUST_LOG`, defaulting to `warn`. Safe to call
/// from every test.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
