//! Bounded worker pools for engine calls.
//!
//! Every call into the engine runs as a task on one of two pools: the
//! dynamic pool (mutation, loading, stats) or the query pool (search,
//! retrieve). The caller blocks on a [`TaskHandle`] until its task finishes.
//! Pools exist to bound how many engine calls run at once and to keep
//! latency-sensitive query traffic away from bursty loads.
//!
//! ## Backpressure
//!
//! Each pool owns a bounded channel. When it is full, [`WorkerPool::submit`]
//! blocks until a worker frees a slot; it never spawns extra threads.
//!
//! ## Cancellation
//!
//! [`TaskHandle::wait_with`] stops waiting when the [`QueryContext`] is
//! cancelled or its deadline passes. The task itself still runs to
//! completion on the worker; its result is discarded.

use crate::config::{Config, PoolConfig};
use crate::error::{CoreError, CoreResult};
use crossbeam_channel::{
    after, bounded, never, select, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
struct PoolStats {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
}

impl PoolStats {
    // Called before the result is sent.
    fn finish(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A fixed-size pool of worker threads fed by a bounded queue.
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
    sender: RwLock<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Starts a pool with `config.workers` threads.
    ///
    /// A worker count or queue capacity of zero is raised to one.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(config: &PoolConfig) -> CoreResult<Self> {
        let workers = config.workers.max(1);
        let (sender, receiver) = bounded::<Job>(config.queue_capacity.max(1));
        let stats = Arc::new(PoolStats::default());

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let receiver = receiver.clone();
            let stats = Arc::clone(&stats);
            let name = config.name;
            let handle = thread::Builder::new()
                .name(format!("{name}-worker-{worker_id}"))
                .spawn(move || run_worker(name, &receiver, &stats))?;
            handles.push(handle);
        }

        debug!(pool = config.name, workers, "worker pool started");
        Ok(Self {
            name: config.name,
            workers,
            sender: RwLock::new(Some(sender)),
            handles: Mutex::new(handles),
            stats,
        })
    }

    /// Queues `task` and returns a handle to its result.
    ///
    /// Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PoolClosed`] after [`WorkerPool::shutdown`].
    pub fn submit<F, T>(&self, task: F) -> CoreResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .sender
            .read()
            .clone()
            .ok_or(CoreError::PoolClosed { pool: self.name })?;

        let (result_tx, result_rx) = bounded(1);
        let stats = Arc::clone(&self.stats);
        let job: Job = Box::new(move || {
            let value = task();
            stats.finish();
            // The waiter may have given up; the result is then dropped.
            let _ = result_tx.send(value);
        });

        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        if sender.send(job).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(CoreError::PoolClosed { pool: self.name });
        }

        Ok(TaskHandle {
            receiver: result_rx,
            pool: self.name,
        })
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tasks submitted but not yet picked up by a worker.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.stats.queued.load(Ordering::Relaxed)
    }

    /// Tasks currently executing.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.stats.active.load(Ordering::Relaxed)
    }

    /// Tasks finished since the pool started.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.stats.completed.load(Ordering::Relaxed)
    }

    /// Stops accepting tasks, drains the queue and joins the workers.
    pub fn shutdown(&self) {
        drop(self.sender.write().take());

        let current = thread::current().id();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(pool = self.name, "worker thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("queue_depth", &self.queue_depth())
            .field("active", &self.active_workers())
            .finish()
    }
}

fn run_worker(pool: &'static str, receiver: &Receiver<Job>, stats: &PoolStats) {
    while let Ok(job) = receiver.recv() {
        stats.queued.fetch_sub(1, Ordering::Relaxed);
        stats.active.fetch_add(1, Ordering::Relaxed);

        // A panicking task drops its result sender; the waiter sees the
        // pool as closed for that task and the worker keeps serving.
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(pool, "task panicked");
            stats.finish();
        }
    }
}

/// Handle to a submitted task's result.
#[derive(Debug)]
#[must_use = "a task handle does nothing unless waited on"]
pub struct TaskHandle<T> {
    receiver: Receiver<T>,
    pool: &'static str,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PoolClosed`] if the task was dropped unexecuted
    /// or panicked.
    pub fn wait(self) -> CoreResult<T> {
        self.receiver
            .recv()
            .map_err(|_| CoreError::PoolClosed { pool: self.pool })
    }

    /// Blocks until the task finishes, `ctx` is cancelled, or its deadline
    /// passes, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] or [`CoreError::DeadlineExceeded`]
    /// when the context fires first, otherwise as [`TaskHandle::wait`].
    pub fn wait_with(self, ctx: &QueryContext) -> CoreResult<T> {
        let deadline = ctx
            .deadline
            .map_or_else(never, |at| after(at.saturating_duration_since(Instant::now())));

        select! {
            recv(self.receiver) -> result => {
                result.map_err(|_| CoreError::PoolClosed { pool: self.pool })
            }
            recv(ctx.done) -> _ => Err(CoreError::Cancelled),
            recv(deadline) -> _ => Err(CoreError::DeadlineExceeded),
        }
    }

    /// Waits at most `timeout` for the task.
    ///
    /// Returns `Ok(None)` on timeout; the handle is consumed either way.
    ///
    /// # Errors
    ///
    /// As [`TaskHandle::wait`].
    pub fn wait_timeout(self, timeout: Duration) -> CoreResult<Option<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CoreError::PoolClosed { pool: self.pool }),
        }
    }
}

/// The two pools a node dispatches engine calls onto.
#[derive(Debug)]
pub struct DispatchPools {
    dynamic: WorkerPool,
    query: WorkerPool,
}

impl DispatchPools {
    /// Starts both pools from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(config: &Config) -> CoreResult<Self> {
        Ok(Self {
            dynamic: WorkerPool::new(&config.dynamic_pool)?,
            query: WorkerPool::new(&config.query_pool)?,
        })
    }

    /// Pool for mutation, loading and stat calls.
    #[must_use]
    pub fn dynamic(&self) -> &WorkerPool {
        &self.dynamic
    }

    /// Pool for search and retrieve calls.
    #[must_use]
    pub fn query(&self) -> &WorkerPool {
        &self.query
    }

    /// Shuts down both pools.
    pub fn shutdown(&self) {
        self.dynamic.shutdown();
        self.query.shutdown();
    }
}

/// Cancellation and deadline carried into query paths.
///
/// Cloning shares cancellation: every clone observes the same
/// [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct QueryContext {
    done: Receiver<()>,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self {
            done: never(),
            deadline: None,
        }
    }

    /// A cancellable context and the handle that cancels it.
    ///
    /// Dropping the handle also cancels the context.
    #[must_use]
    pub fn cancellable() -> (Self, CancelHandle) {
        let (sender, done) = bounded(0);
        let ctx = Self {
            done,
            deadline: None,
        };
        (
            ctx,
            CancelHandle {
                sender: Mutex::new(Some(sender)),
            },
        )
    }

    /// Adds a deadline, keeping the earlier one if already set.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Adds a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails if the context is already cancelled or past its deadline.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] or [`CoreError::DeadlineExceeded`].
    pub fn check(&self) -> CoreResult<()> {
        if matches!(self.done.try_recv(), Err(TryRecvError::Disconnected)) {
            return Err(CoreError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CoreError::DeadlineExceeded);
        }
        Ok(())
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::background()
    }
}

/// Cancels the [`QueryContext`] it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    sender: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    /// Cancels the context. Idempotent.
    pub fn cancel(&self) {
        drop(self.sender.lock().take());
    }
}
