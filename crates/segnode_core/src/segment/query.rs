//! Search, retrieve and stat queries.

use super::Segment;
use crate::dispatch::QueryContext;
use crate::engine::{RetrievePlan, SearchRequest, SearchResult, SegmentEngine};
use crate::error::{CoreError, CoreResult};
use crate::hydrate::FieldHydrator;
use crate::metrics::OperationKind;
use crate::types::FieldId;
use segnode_codec::RetrieveResults;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

impl Segment {
    /// Searches the segment.
    ///
    /// Runs on the query pool; waiting stops early if `ctx` is cancelled
    /// or expires.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Unhealthy`] after destruction
    /// - [`CoreError::InvalidInput`] if the request carries no plan
    /// - [`CoreError::Engine`] if the search fails
    /// - [`CoreError::Cancelled`] or [`CoreError::DeadlineExceeded`]
    pub fn search(&self, request: &SearchRequest, ctx: &QueryContext) -> CoreResult<SearchResult> {
        let state = self.state.read();
        let engine = self.healthy_engine(&state)?;
        let plan = request
            .plan
            .clone()
            .ok_or_else(|| CoreError::invalid_input("nil search plan"))?;

        let load_index = self.has_load_index_for_indexed_field(plan.field_id);
        debug!(
            msg_id = request.msg_id,
            segment_id = self.id(),
            segment_type = %state.segment_type,
            load_index,
            "start do search on segment"
        );

        let placeholder = request.placeholder.clone();
        let timestamp = request.timestamp;
        let result = self
            .run(
                self.runtime.pools.query(),
                OperationKind::Search,
                ctx,
                move || engine.search(&plan, &placeholder, timestamp),
            )?
            .map_err(|status| status.into_error("Search"))?;

        debug!(
            msg_id = request.msg_id,
            segment_id = self.id(),
            segment_type = %state.segment_type,
            load_index,
            "do search on segment done"
        );
        Ok(result)
    }

    /// Retrieves rows matching `plan`, sorted by primary key.
    ///
    /// When the runtime has a blob store, vector fields whose index keeps
    /// no raw data are hydrated from their binlogs before returning.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Unhealthy`] after destruction
    /// - [`CoreError::Engine`] if the retrieve fails
    /// - [`CoreError::OutputTooLarge`] if the result exceeds the configured bound
    /// - [`CoreError::Codec`] if the result does not decode
    /// - [`CoreError::Hydration`] if a binlog cannot be read
    /// - [`CoreError::Cancelled`] or [`CoreError::DeadlineExceeded`]
    pub fn retrieve(&self, plan: &RetrievePlan, ctx: &QueryContext) -> CoreResult<RetrieveResults> {
        let state = self.state.read();
        let engine = self.healthy_engine(&state)?;

        let limit = self.runtime.config.max_output_size;
        let task_engine = Arc::clone(&engine);
        let task_plan = plan.clone();
        let blob = self.run(
            self.runtime.pools.query(),
            OperationKind::Query,
            ctx,
            move || task_engine.retrieve(&task_plan, limit),
        )?;

        debug!(
            msg_id = plan.msg_id,
            segment_id = self.id(),
            segment_type = %state.segment_type,
            "do retrieve on segment"
        );

        let blob = blob.map_err(|status| status.into_error("Retrieve"))?;
        let size = blob.len() as i64;
        if size > limit {
            return Err(CoreError::OutputTooLarge { size, limit });
        }

        let mut results: RetrieveResults = segnode_codec::decode(&blob)?;
        results.sort_by_pk()?;
        self.hydrate(&engine, &mut results, ctx)?;
        Ok(results)
    }

    /// Hydrates indexed vector fields of `results` that the engine cannot
    /// serve from memory.
    ///
    /// Does nothing without a blob store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Unhealthy`] after destruction, otherwise as
    /// [`Segment::retrieve`]'s hydration step.
    pub fn fill_indexed_fields_data(
        &self,
        results: &mut RetrieveResults,
        ctx: &QueryContext,
    ) -> CoreResult<()> {
        let state = self.state.read();
        let engine = self.healthy_engine(&state)?;
        self.hydrate(&engine, results, ctx)
    }

    fn hydrate(
        &self,
        engine: &Arc<dyn SegmentEngine>,
        results: &mut RetrieveResults,
        ctx: &QueryContext,
    ) -> CoreResult<()> {
        let Some(store) = self.runtime.blob_store() else {
            return Ok(());
        };
        let hydrator = FieldHydrator::new(store.as_ref(), self.runtime.config.endian);

        let RetrieveResults {
            offsets,
            fields_data,
            ..
        } = results;
        let offsets: &[i64] = offsets;
        for field in fields_data.iter_mut() {
            if !field.data_type.is_vector()
                || !self.has_load_index_for_indexed_field(field.field_id)
            {
                continue;
            }
            let field_id = field.field_id;
            let probe = Arc::clone(engine);
            let has_raw_data = self.run(
                self.runtime.pools.dynamic(),
                OperationKind::Stats,
                ctx,
                move || probe.has_raw_data(field_id),
            )?;
            if has_raw_data {
                continue;
            }
            let Ok(info) = self.indexed_field_info(field_id) else {
                continue;
            };
            hydrator.hydrate_field(&info, field, offsets, ctx)?;
        }
        Ok(())
    }

    /// Whether the engine can serve `field_id` from memory.
    ///
    /// False once destroyed.
    #[must_use]
    pub fn has_raw_data(&self, field_id: FieldId) -> bool {
        self.stat(false, move |engine| engine.has_raw_data(field_id))
    }

    /// Rows not deleted, or -1 once destroyed.
    #[must_use]
    pub fn real_count(&self) -> i64 {
        self.stat(-1, |engine| engine.real_count())
    }

    /// Rows held, or -1 once destroyed.
    #[must_use]
    pub fn row_count(&self) -> i64 {
        self.stat(-1, |engine| engine.row_count())
    }

    /// Deleted rows, or -1 once destroyed.
    #[must_use]
    pub fn deleted_count(&self) -> i64 {
        self.stat(-1, |engine| engine.deleted_count())
    }

    /// Engine memory usage in bytes, or -1 once destroyed.
    #[must_use]
    pub fn mem_size(&self) -> i64 {
        self.stat(-1, |engine| engine.memory_usage())
    }

    /// Re-reads memory usage into the cached value and returns it.
    pub fn refresh_mem_size(&self) -> i64 {
        let size = self.mem_size();
        self.last_mem_size.store(size, Ordering::Relaxed);
        size
    }

    /// Re-reads the row count into the cached value and returns it.
    pub fn refresh_row_count(&self) -> i64 {
        let rows = self.row_count();
        self.last_row_count.store(rows, Ordering::Relaxed);
        rows
    }

    /// Memory usage as of the last refresh.
    #[must_use]
    pub fn last_mem_size(&self) -> i64 {
        self.last_mem_size.load(Ordering::Relaxed)
    }

    /// Row count as of the last refresh.
    #[must_use]
    pub fn last_row_count(&self) -> i64 {
        self.last_row_count.load(Ordering::Relaxed)
    }

    fn stat<T, F>(&self, unhealthy: T, call: F) -> T
    where
        F: FnOnce(&dyn SegmentEngine) -> T + Send + 'static,
        T: Send + 'static,
    {
        let state = self.state.read();
        let Some(engine) = state.engine.clone() else {
            return unhealthy;
        };
        match self.run(
            self.runtime.pools.dynamic(),
            OperationKind::Stats,
            &QueryContext::background(),
            move || call(engine.as_ref()),
        ) {
            Ok(value) => value,
            Err(err) => {
                warn!(segment_id = self.id(), error = %err, "stat query failed");
                unhealthy
            }
        }
    }
}
