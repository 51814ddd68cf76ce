//! The segment aggregate.
//!
//! A [`Segment`] owns one engine handle and everything around it: type and
//! health, the pre-flush delete buffer and watermark, primary-key
//! statistics, and per-field index descriptors.
//!
//! ## Locking
//!
//! One reader/writer lock guards the engine handle together with the
//! segment type. Every engine call holds the read lock from the health
//! check until the dispatched task completes. [`Segment::destroy`] takes
//! the write lock, so it waits out in-flight calls, and detaches the handle;
//! from then on every call fails fast with [`CoreError::Unhealthy`].
//!
//! Bloom filter generations sit behind a separate mutex and never contend
//! with engine calls. Direct delete application is serialized by the
//! watermark mutex.
//!
//! ## Layout
//!
//! - `growing`: offset reservation, insert, delete, delete flush
//! - `sealed`: field data, deleted record and index loading
//! - `query`: search, retrieve, hydration, stat queries
//! - `existence`: bloom filter maintenance and primary-key checks

mod existence;
mod growing;
mod query;
mod sealed;

use crate::binlog::IndexedFieldInfo;
use crate::config::Config;
use crate::delete_buffer::DeleteBuffer;
use crate::dispatch::{DispatchPools, QueryContext, WorkerPool};
use crate::engine::{EngineFactory, SegmentEngine};
use crate::error::{CoreError, CoreResult};
use crate::metrics::{EntityLabels, NodeMetrics, OperationKind};
use crate::pk_stats::PkStatistics;
use crate::types::{FieldId, MsgPosition, SegmentType, Timestamp, UniqueId};
use parking_lot::{Mutex, RwLock};
use segnode_codec::CollectionSchema;
use segnode_storage::BlobStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Node-wide collaborators shared by every segment.
pub struct SegmentRuntime {
    config: Config,
    pools: DispatchPools,
    metrics: Arc<NodeMetrics>,
    engine_factory: Arc<dyn EngineFactory>,
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl SegmentRuntime {
    /// Starts the dispatch pools described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(config: Config, engine_factory: Arc<dyn EngineFactory>) -> CoreResult<Self> {
        let pools = DispatchPools::new(&config)?;
        Ok(Self {
            config,
            pools,
            metrics: Arc::new(NodeMetrics::new()),
            engine_factory,
            blob_store: None,
        })
    }

    /// Uses `store` to hydrate retrieve output.
    #[must_use]
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    /// Records into `metrics` instead of a private registry.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<NodeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Node configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatch pools.
    #[must_use]
    pub fn pools(&self) -> &DispatchPools {
        &self.pools
    }

    /// Metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    /// Blob store used for hydration, if any.
    #[must_use]
    pub fn blob_store(&self) -> Option<&Arc<dyn BlobStore>> {
        self.blob_store.as_ref()
    }

    /// Stops both dispatch pools. Later engine calls fail with
    /// [`CoreError::PoolClosed`].
    pub fn shutdown(&self) {
        self.pools.shutdown();
    }
}

impl std::fmt::Debug for SegmentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentRuntime")
            .field("config", &self.config)
            .field("pools", &self.pools)
            .field("has_blob_store", &self.blob_store.is_some())
            .finish_non_exhaustive()
    }
}

/// Identity of a segment, fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Segment id.
    pub segment_id: UniqueId,
    /// Owning partition.
    pub partition_id: UniqueId,
    /// Owning collection.
    pub collection_id: UniqueId,
    /// Load version.
    pub version: UniqueId,
    /// Virtual channel the segment consumes.
    pub vchannel: String,
    /// Replay position for growing segments.
    pub start_position: Option<MsgPosition>,
}

impl SegmentMeta {
    /// Identity with version 0, no channel and no start position.
    #[must_use]
    pub fn new(segment_id: UniqueId, partition_id: UniqueId, collection_id: UniqueId) -> Self {
        Self {
            segment_id,
            partition_id,
            collection_id,
            ..Self::default()
        }
    }

    /// Sets the load version.
    #[must_use]
    pub fn version(mut self, version: UniqueId) -> Self {
        self.version = version;
        self
    }

    /// Sets the virtual channel.
    #[must_use]
    pub fn vchannel(mut self, vchannel: impl Into<String>) -> Self {
        self.vchannel = vchannel.into();
        self
    }

    /// Sets the replay position.
    #[must_use]
    pub fn start_position(mut self, position: MsgPosition) -> Self {
        self.start_position = Some(position);
        self
    }
}

/// Engine handle and type, guarded together.
struct SegmentState {
    engine: Option<Arc<dyn SegmentEngine>>,
    segment_type: SegmentType,
}

#[derive(Default)]
struct PkGenerations {
    current: Option<PkStatistics>,
    history: Vec<PkStatistics>,
    destroyed: bool,
}

/// One segment: an engine handle plus its delete, existence and index
/// bookkeeping.
pub struct Segment {
    meta: SegmentMeta,
    schema: Arc<CollectionSchema>,
    runtime: Arc<SegmentRuntime>,

    state: RwLock<SegmentState>,
    recently_modified: AtomicBool,
    lazy_loading: AtomicBool,
    last_mem_size: AtomicI64,
    last_row_count: AtomicI64,

    delete_buffer: DeleteBuffer,
    flushed_delete_ts: Mutex<Timestamp>,

    indexed_fields: RwLock<HashMap<FieldId, IndexedFieldInfo>>,
    stats: Mutex<PkGenerations>,
}

impl Segment {
    /// Creates an empty, healthy segment and its engine.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Engine`] if the engine cannot be created, or a
    /// dispatch error if the dynamic pool is closed.
    pub fn new(
        runtime: Arc<SegmentRuntime>,
        schema: Arc<CollectionSchema>,
        meta: SegmentMeta,
        segment_type: SegmentType,
    ) -> CoreResult<Self> {
        let factory = Arc::clone(&runtime.engine_factory);
        let engine_schema = Arc::clone(&schema);
        let segment_id = meta.segment_id;
        let created = dispatch(
            &runtime,
            runtime.pools.dynamic(),
            OperationKind::Stats,
            &QueryContext::background(),
            move || factory.create(&engine_schema, segment_type, segment_id),
        )?;

        let engine = created.map_err(|status| {
            error!(
                collection_id = meta.collection_id,
                partition_id = meta.partition_id,
                segment_id,
                segment_type = %segment_type,
                code = status.code,
                message = %status.message,
                "create new segment error"
            );
            status.into_error("NewSegment")
        })?;

        info!(
            collection_id = meta.collection_id,
            partition_id = meta.partition_id,
            segment_id,
            segment_type = %segment_type,
            vchannel = %meta.vchannel,
            "create segment"
        );

        Ok(Self {
            meta,
            schema,
            runtime,
            state: RwLock::new(SegmentState {
                engine: Some(engine),
                segment_type,
            }),
            recently_modified: AtomicBool::new(false),
            lazy_loading: AtomicBool::new(false),
            last_mem_size: AtomicI64::new(0),
            last_row_count: AtomicI64::new(0),
            delete_buffer: DeleteBuffer::new(),
            flushed_delete_ts: Mutex::new(0),
            indexed_fields: RwLock::new(HashMap::new()),
            stats: Mutex::new(PkGenerations::default()),
        })
    }

    /// Segment id.
    #[must_use]
    pub fn id(&self) -> UniqueId {
        self.meta.segment_id
    }

    /// Owning partition.
    #[must_use]
    pub fn partition_id(&self) -> UniqueId {
        self.meta.partition_id
    }

    /// Owning collection.
    #[must_use]
    pub fn collection_id(&self) -> UniqueId {
        self.meta.collection_id
    }

    /// Load version.
    #[must_use]
    pub fn version(&self) -> UniqueId {
        self.meta.version
    }

    /// Virtual channel.
    #[must_use]
    pub fn vchannel(&self) -> &str {
        &self.meta.vchannel
    }

    /// Replay position, if any.
    #[must_use]
    pub fn start_position(&self) -> Option<&MsgPosition> {
        self.meta.start_position.as_ref()
    }

    /// Collection schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<CollectionSchema> {
        &self.schema
    }

    /// Current segment type.
    #[must_use]
    pub fn segment_type(&self) -> SegmentType {
        self.state.read().segment_type
    }

    /// Re-tags a growing segment as sealed.
    ///
    /// Setting the current type again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] for a sealed-to-growing change.
    pub fn set_type(&self, segment_type: SegmentType) -> CoreResult<()> {
        let mut state = self.state.write();
        match (state.segment_type, segment_type) {
            (from, to) if from == to => Ok(()),
            (SegmentType::Growing, SegmentType::Sealed) => {
                state.segment_type = SegmentType::Sealed;
                Ok(())
            }
            (from, to) => Err(CoreError::illegal_state(format!(
                "segment {} cannot change from {from} to {to}",
                self.id()
            ))),
        }
    }

    /// Returns false once the segment has been destroyed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state.read().engine.is_some()
    }

    /// Whether an insert succeeded since the flag was last cleared.
    #[must_use]
    pub fn recently_modified(&self) -> bool {
        self.recently_modified.load(Ordering::Relaxed)
    }

    /// Sets or clears the recently-modified hint.
    pub fn set_recently_modified(&self, modified: bool) {
        self.recently_modified.store(modified, Ordering::Relaxed);
    }

    /// Registers index and binlog info for a field.
    ///
    /// The first registration for a field wins; later ones are ignored.
    pub fn set_indexed_field_info(&self, field_id: FieldId, info: IndexedFieldInfo) {
        self.indexed_fields.write().entry(field_id).or_insert(info);
    }

    /// The registered info for `field_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldNotFound`] if nothing is registered.
    pub fn indexed_field_info(&self, field_id: FieldId) -> CoreResult<IndexedFieldInfo> {
        self.indexed_fields
            .read()
            .get(&field_id)
            .cloned()
            .ok_or(CoreError::FieldNotFound { field_id })
    }

    /// True if `field_id` has an enabled index registered.
    #[must_use]
    pub fn has_load_index_for_indexed_field(&self, field_id: FieldId) -> bool {
        self.indexed_fields
            .read()
            .get(&field_id)
            .and_then(|info| info.index_info.as_ref())
            .is_some_and(|index| index.enable_index)
    }

    /// Destroys the segment.
    ///
    /// Waits for in-flight engine calls, marks the segment unhealthy,
    /// releases the engine on the dynamic pool and drops the bloom filter
    /// generations. Later calls are no-ops.
    pub fn destroy(&self) {
        let (engine, segment_type) = {
            let mut state = self.state.write();
            (state.engine.take(), state.segment_type)
        };
        let Some(engine) = engine else {
            return;
        };
        self.delete_buffer.discard();

        match self.runtime.pools.dynamic().submit(move || drop(engine)) {
            Ok(handle) => {
                if let Err(err) = handle.wait() {
                    error!(segment_id = self.id(), error = %err, "engine release failed");
                }
            }
            // The rejected task, and the engine with it, was dropped here.
            Err(err) => error!(segment_id = self.id(), error = %err, "engine released inline"),
        }

        let mut stats = self.stats.lock();
        stats.current = None;
        stats.history.clear();
        stats.destroyed = true;
        drop(stats);

        info!(
            collection_id = self.collection_id(),
            partition_id = self.partition_id(),
            segment_id = self.id(),
            segment_type = %segment_type,
            "delete segment from memory"
        );
    }

    /// The engine, or [`CoreError::Unhealthy`] once destroyed.
    ///
    /// Callers hold the state read lock for as long as they use the handle.
    fn ensure_healthy(&self) -> CoreResult<()> {
        self.healthy_engine(&self.state.read()).map(drop)
    }

    fn healthy_engine(&self, state: &SegmentState) -> CoreResult<Arc<dyn SegmentEngine>> {
        state
            .engine
            .as_ref()
            .map(Arc::clone)
            .ok_or(CoreError::unhealthy(self.id()))
    }

    fn entity_labels(&self, segment_type: SegmentType) -> EntityLabels {
        EntityLabels {
            node_id: self.runtime.config.node_id,
            collection_id: self.collection_id(),
            partition_id: self.partition_id(),
            segment_type,
        }
    }

    fn run<T, F>(
        &self,
        pool: &WorkerPool,
        kind: OperationKind,
        ctx: &QueryContext,
        task: F,
    ) -> CoreResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        dispatch(&self.runtime, pool, kind, ctx, task)
    }
}

/// Runs `task` on `pool`, timing it into the `kind` latency histogram.
fn dispatch<T, F>(
    runtime: &SegmentRuntime,
    pool: &WorkerPool,
    kind: OperationKind,
    ctx: &QueryContext,
    task: F,
) -> CoreResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let histogram = runtime
        .metrics
        .latency_histogram(runtime.config.node_id, kind);
    let handle = pool.submit(move || {
        let timer = crate::metrics::Timer::start();
        let out = task();
        timer.observe(&histogram);
        out
    })?;
    handle.wait_with(ctx)
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Segment")
            .field("meta", &self.meta)
            .field("segment_type", &state.segment_type)
            .field("healthy", &state.engine.is_some())
            .finish_non_exhaustive()
    }
}
