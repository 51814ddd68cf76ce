//! Concurrency stress harness.
//!
//! Runs mixed search, retrieve, delete and stat traffic against one segment
//! from several threads, optionally destroying it part way through, and
//! tallies outcomes by kind.

use segnode_core::engine::{MetricType, RetrievePlan, RetrievePredicate, SearchPlan, SearchRequest};
use segnode_core::{CoreError, PrimaryKey, QueryContext, Segment};
use segnode_codec::FieldPayload;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use crate::fixtures::{vector_for, SCORE_FIELD, VECTOR_FIELD};

/// Result of a stress run.
#[derive(Debug, Clone, PartialEq)]
pub struct StressTestResult {
    /// Calls that succeeded.
    pub successful_ops: usize,
    /// Calls rejected because the segment was destroyed.
    pub unhealthy_ops: usize,
    /// Calls that failed any other way.
    pub failed_ops: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

impl StressTestResult {
    /// Total calls made.
    pub fn total_ops(&self) -> usize {
        self.successful_ops + self.unhealthy_ops + self.failed_ops
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops());
        println!("Successful: {}", self.successful_ops);
        println!("Unhealthy: {}", self.unhealthy_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Worker threads issuing calls.
    pub threads: usize,
    /// Calls per thread.
    pub operations: usize,
    /// Destroy the segment once this many calls have completed in total.
    pub destroy_after: Option<usize>,
    /// Vector dimension of the segment's schema.
    pub dim: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            operations: 200,
            destroy_after: None,
            dim: 4,
        }
    }
}

#[derive(Default)]
struct Tally {
    successful: AtomicUsize,
    unhealthy: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record<T>(&self, outcome: Result<T, CoreError>) {
        let counter = match outcome {
            Ok(_) => &self.successful,
            Err(err) if err.is_unhealthy() => &self.unhealthy,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn completed(&self) -> usize {
        self.successful.load(Ordering::Relaxed)
            + self.unhealthy.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
    }
}

fn search_request(dim: usize, seed: i64) -> SearchRequest {
    let queries = FieldPayload::FloatVector {
        dim,
        data: vector_for(seed, dim),
    };
    SearchRequest {
        msg_id: seed,
        plan: Some(Arc::new(SearchPlan {
            field_id: VECTOR_FIELD,
            metric_type: MetricType::L2,
            topk: 5,
        })),
        placeholder: segnode_codec::encode(&queries).unwrap_or_default(),
        timestamp: u64::MAX - 1,
    }
}

fn retrieve_plan(seed: i64) -> RetrievePlan {
    RetrievePlan {
        msg_id: seed,
        timestamp: u64::MAX - 1,
        predicate: RetrievePredicate::PkIn(vec![PrimaryKey::Int64(seed)]),
        output_field_ids: vec![SCORE_FIELD],
    }
}

/// Runs mixed traffic against `segment`.
///
/// Stat queries count as successful when they return a non-negative value
/// and as unhealthy when they return -1.
pub fn stress_mixed_queries(segment: Arc<Segment>, config: &StressConfig) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let start_line = Arc::new(Barrier::new(config.threads + 1));
    let start = Instant::now();

    let workers: Vec<_> = (0..config.threads)
        .map(|t| {
            let segment = Arc::clone(&segment);
            let tally = Arc::clone(&tally);
            let start_line = Arc::clone(&start_line);
            let operations = config.operations;
            let dim = config.dim;
            thread::spawn(move || {
                start_line.wait();
                let ctx = QueryContext::background();
                for i in 0..operations {
                    let seed = (t * operations + i) as i64;
                    match i % 4 {
                        0 => tally.record(segment.search(&search_request(dim, seed), &ctx)),
                        1 => tally.record(segment.retrieve(&retrieve_plan(seed), &ctx)),
                        2 => tally.record(segment.delete(
                            &[PrimaryKey::Int64(seed)],
                            &[1_000 + seed as u64],
                        )),
                        _ => {
                            let outcome = if segment.real_count() < 0 {
                                Err(CoreError::unhealthy(segment.id()))
                            } else {
                                Ok(())
                            };
                            tally.record(outcome);
                        }
                    }
                }
            })
        })
        .collect();

    start_line.wait();
    if let Some(threshold) = config.destroy_after {
        while tally.completed() < threshold && !workers.iter().all(|w| w.is_finished()) {
            thread::yield_now();
        }
        segment.destroy();
    }

    for worker in workers {
        let _ = worker.join();
    }

    StressTestResult {
        successful_ops: tally.successful.load(Ordering::Relaxed),
        unhealthy_ops: tally.unhealthy.load(Ordering::Relaxed),
        failed_ops: tally.failed.load(Ordering::Relaxed),
        duration: start.elapsed(),
    }
}
