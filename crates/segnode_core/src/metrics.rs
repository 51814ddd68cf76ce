//! Latency and entity metrics.
//!
//! Histograms and counters are plain atomics keyed by label tuples. Nothing
//! here exports; collaborators read [`HistogramSnapshot`]s or counter values
//! and publish them however the deployment wants.
//!
//! # Usage
//!
//! ```rust
//! use segnode_core::metrics::{NodeMetrics, OperationKind};
//! use std::time::Duration;
//!
//! let metrics = NodeMetrics::new();
//! metrics.observe_latency(1, OperationKind::Search, Duration::from_millis(3));
//! let snapshot = metrics.latency(1, OperationKind::Search).unwrap();
//! assert_eq!(snapshot.count, 1);
//! ```

use crate::types::{SegmentType, UniqueId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default latency bucket upper bounds, in milliseconds.
pub const DEFAULT_LATENCY_BUCKETS_MS: &[f64] = &[
    0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
];

/// Kind of engine call being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Search on the query pool.
    Search,
    /// Retrieve on the query pool.
    Query,
    /// Row offset reservation.
    PreInsert,
    /// Growing-segment insert.
    Insert,
    /// Delete application.
    Delete,
    /// Field binlog load.
    LoadFieldData,
    /// Deleted-record load.
    LoadDeletedRecord,
    /// Sealed index update.
    LoadIndex,
    /// Row counts, memory usage and raw-data probes.
    Stats,
}

impl OperationKind {
    /// Label value for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "Search",
            Self::Query => "Query",
            Self::PreInsert => "PreInsert",
            Self::Insert => "Insert",
            Self::Delete => "Delete",
            Self::LoadFieldData => "LoadFieldData",
            Self::LoadDeletedRecord => "LoadDeletedRecord",
            Self::LoadIndex => "LoadIndex",
            Self::Stats => "Stats",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Histogram for tracking latency distributions.
///
/// Each observation lands in the first bucket whose bound is at least the
/// value; values above every bound are only counted in the total.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Creates a histogram with the given millisecond bucket bounds.
    #[must_use]
    pub fn new(bounds_ms: &[f64]) -> Self {
        Self {
            buckets: bounds_ms.iter().map(|&b| (b, AtomicU64::new(0))).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records one duration.
    pub fn observe(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let ms = elapsed.as_secs_f64() * 1000.0;
        if let Some((_, bucket)) = self.buckets.iter().find(|(bound, _)| ms <= *bound) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of observations.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the histogram.
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum_ms = self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0;
        HistogramSnapshot {
            count,
            sum_ms,
            mean_ms: if count > 0 { sum_ms / count as f64 } else { 0.0 },
            buckets: self
                .buckets
                .iter()
                .map(|(bound, n)| (*bound, n.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_BUCKETS_MS)
    }
}

/// Histogram statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations in milliseconds.
    pub sum_ms: f64,
    /// Mean observation in milliseconds.
    pub mean_ms: f64,
    /// `(upper bound ms, hits)` per bucket.
    pub buckets: Vec<(f64, u64)>,
}

/// Timer that records into a histogram when stopped.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Starts a timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Time since start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer, recording into `histogram`, and returns the duration.
    pub fn observe(self, histogram: &Histogram) -> Duration {
        let elapsed = self.elapsed();
        histogram.observe(elapsed);
        elapsed
    }
}

/// Labels of the entity counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityLabels {
    /// Node id.
    pub node_id: i64,
    /// Collection id.
    pub collection_id: UniqueId,
    /// Partition id.
    pub partition_id: UniqueId,
    /// Segment type.
    pub segment_type: SegmentType,
}

/// Per-node latency histograms and entity counters.
#[derive(Debug, Default)]
pub struct NodeMetrics {
    latencies: RwLock<HashMap<(i64, OperationKind), Arc<Histogram>>>,
    entities: RwLock<HashMap<EntityLabels, Arc<AtomicI64>>>,
}

impl NodeMetrics {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the histogram for `(node_id, kind)`, creating it on first use.
    pub fn latency_histogram(&self, node_id: i64, kind: OperationKind) -> Arc<Histogram> {
        if let Some(h) = self.latencies.read().get(&(node_id, kind)) {
            return Arc::clone(h);
        }
        Arc::clone(self.latencies.write().entry((node_id, kind)).or_default())
    }

    /// Records one call duration.
    pub fn observe_latency(&self, node_id: i64, kind: OperationKind, elapsed: Duration) {
        self.latency_histogram(node_id, kind).observe(elapsed);
    }

    /// Snapshot of the `(node_id, kind)` histogram, if anything was recorded.
    #[must_use]
    pub fn latency(&self, node_id: i64, kind: OperationKind) -> Option<HistogramSnapshot> {
        self.latencies
            .read()
            .get(&(node_id, kind))
            .map(|h| h.snapshot())
    }

    /// Adds `delta` processed entities under `labels`.
    pub fn add_entities(&self, labels: EntityLabels, delta: i64) {
        let counter = {
            let existing = self.entities.read().get(&labels).map(Arc::clone);
            match existing {
                Some(counter) => counter,
                None => Arc::clone(self.entities.write().entry(labels).or_default()),
            }
        };
        counter.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current entity count under `labels`.
    #[must_use]
    pub fn entities(&self, labels: EntityLabels) -> i64 {
        self.entities
            .read()
            .get(&labels)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets() {
        let h = Histogram::new(&[1.0, 10.0]);
        h.observe(Duration::from_micros(500));
        h.observe(Duration::from_millis(5));
        h.observe(Duration::from_millis(50));

        let snap = h.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.buckets, vec![(1.0, 1), (10.0, 1)]);
        assert!((snap.sum_ms - 55.5).abs() < 1e-9);
    }

    #[test]
    fn empty_histogram_mean_is_zero() {
        let snap = Histogram::default().snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.mean_ms, 0.0);
    }

    #[test]
    fn timer_records() {
        let h = Histogram::default();
        let timer = Timer::start();
        let elapsed = timer.observe(&h);
        assert_eq!(h.count(), 1);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn node_metrics_are_keyed() {
        let metrics = NodeMetrics::new();
        metrics.observe_latency(1, OperationKind::Search, Duration::from_millis(1));
        metrics.observe_latency(1, OperationKind::Search, Duration::from_millis(2));
        metrics.observe_latency(2, OperationKind::Search, Duration::from_millis(1));

        assert_eq!(metrics.latency(1, OperationKind::Search).unwrap().count, 2);
        assert_eq!(metrics.latency(2, OperationKind::Search).unwrap().count, 1);
        assert!(metrics.latency(1, OperationKind::Query).is_none());
    }

    #[test]
    fn entity_counters() {
        let metrics = NodeMetrics::new();
        let growing = EntityLabels {
            node_id: 1,
            collection_id: 10,
            partition_id: 20,
            segment_type: SegmentType::Growing,
        };
        let sealed = EntityLabels {
            segment_type: SegmentType::Sealed,
            ..growing
        };

        metrics.add_entities(growing, 100);
        metrics.add_entities(growing, 5);
        assert_eq!(metrics.entities(growing), 105);
        assert_eq!(metrics.entities(sealed), 0);
    }
}
