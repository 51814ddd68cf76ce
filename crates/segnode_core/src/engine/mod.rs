//! The native segment engine boundary.
//!
//! A [`SegmentEngine`] is one segment's in-memory vector and scalar store
//! plus its indexes. Segments never look inside it: they pass blobs and
//! descriptors in, and get statuses and blobs back. Dropping the last
//! handle destroys the engine.
//!
//! All calls arrive on dispatch-pool workers, never on the caller's thread.
//! Implementations must be `Send + Sync`; they may assume the owning
//! segment never calls them after destruction.

pub mod memory;

use crate::error::CoreError;
use crate::types::{FieldId, PrimaryKey, SegmentType, Timestamp, UniqueId};
use segnode_codec::{CollectionSchema, DataType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Field id of the system row-id column.
pub const ROW_ID_FIELD_ID: FieldId = 0;

/// Field id of the system timestamp column.
pub const TIMESTAMP_FIELD_ID: FieldId = 1;

/// Non-zero status returned by an engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// Engine-specific error code.
    pub code: i32,
    /// Human-readable detail.
    pub message: String,
}

impl EngineStatus {
    /// Generic failure code.
    pub const UNEXPECTED: i32 = 1;
    /// The request referenced something the engine does not hold.
    pub const NOT_FOUND: i32 = 2;
    /// The request was malformed.
    pub const INVALID_ARGUMENT: i32 = 3;

    /// Creates a status.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Converts into the error returned by the segment call `operation`.
    #[must_use]
    pub fn into_error(self, operation: &'static str) -> CoreError {
        CoreError::engine(operation, self.code, self.message)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// Result of an engine call.
pub type EngineResult<T> = Result<T, EngineStatus>;

/// Similarity metric of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// Euclidean distance; smaller is closer.
    L2,
    /// Inner product; larger is closer.
    Ip,
}

/// A compiled search plan.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    /// Vector field searched.
    pub field_id: FieldId,
    /// Metric to rank by.
    pub metric_type: MetricType,
    /// Hits per query.
    pub topk: usize,
}

/// A search against one segment.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Upstream message id, for logs.
    pub msg_id: i64,
    /// The plan; a request without one is rejected.
    pub plan: Option<Arc<SearchPlan>>,
    /// Encoded query vectors.
    pub placeholder: Vec<u8>,
    /// Visibility timestamp.
    pub timestamp: Timestamp,
}

impl SearchRequest {
    /// The searched field, if a plan is present.
    #[must_use]
    pub fn search_field_id(&self) -> Option<FieldId> {
        self.plan.as_ref().map(|plan| plan.field_id)
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Primary key of the hit.
    pub pk: PrimaryKey,
    /// Segment row offset of the hit.
    pub offset: i64,
    /// Metric value.
    pub score: f32,
}

/// Per-segment search output, reduced across segments elsewhere.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    /// Hits per query, best first.
    pub hits: Vec<Vec<SearchHit>>,
}

/// Row filter of a retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievePredicate {
    /// Every visible row.
    All,
    /// Visible rows with one of these keys.
    PkIn(Vec<PrimaryKey>),
}

/// A compiled retrieve plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievePlan {
    /// Upstream message id, for logs.
    pub msg_id: i64,
    /// Visibility timestamp.
    pub timestamp: Timestamp,
    /// Row filter.
    pub predicate: RetrievePredicate,
    /// Fields to return.
    pub output_field_ids: Vec<FieldId>,
}

/// One field's binlogs handed to the engine for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLoadInfo {
    /// Field loaded.
    pub field_id: FieldId,
    /// Rows the field holds.
    pub row_count: i64,
    /// Binlog paths in row order.
    pub binlog_paths: Vec<String>,
}

/// A load-field-data request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadFieldDataInfo {
    /// Fields to load.
    pub fields: Vec<FieldLoadInfo>,
}

/// A sealed-index load request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadIndexInfo {
    /// Indexed field.
    pub field_id: FieldId,
    /// Element type of the indexed field.
    pub field_type: DataType,
    /// Index id.
    pub index_id: UniqueId,
    /// Build id.
    pub build_id: UniqueId,
    /// Index type, e.g. `IVF_FLAT`.
    pub index_type: String,
    /// Index files in storage.
    pub index_files: Vec<String>,
    /// Build parameters.
    pub index_params: HashMap<String, String>,
}

/// The calls a segment makes into its engine.
pub trait SegmentEngine: Send + Sync {
    /// Reserves `num_rows` contiguous row offsets and returns the first.
    fn pre_insert(&self, num_rows: i64) -> EngineResult<i64>;

    /// Inserts an encoded [`segnode_codec::InsertRecord`] at `offset`.
    fn insert(
        &self,
        offset: i64,
        row_ids: &[i64],
        timestamps: &[Timestamp],
        record: &[u8],
    ) -> EngineResult<()>;

    /// Applies an encoded [`segnode_codec::IdSet`] of deletes.
    fn delete(&self, ids: &[u8], timestamps: &[Timestamp]) -> EngineResult<()>;

    /// Runs a search.
    fn search(
        &self,
        plan: &SearchPlan,
        placeholder: &[u8],
        timestamp: Timestamp,
    ) -> EngineResult<SearchResult>;

    /// Runs a retrieve and returns encoded [`segnode_codec::RetrieveResults`].
    fn retrieve(&self, plan: &RetrievePlan, max_output_size: i64) -> EngineResult<Vec<u8>>;

    /// Loads field binlogs.
    fn load_field_data(&self, info: &LoadFieldDataInfo) -> EngineResult<()>;

    /// Loads deleted records for a sealed segment.
    fn load_deleted_record(
        &self,
        ids: &[u8],
        timestamps: &[Timestamp],
        row_count: i64,
    ) -> EngineResult<()>;

    /// Installs a sealed index.
    fn update_sealed_index(&self, info: &LoadIndexInfo) -> EngineResult<()>;

    /// Records the raw byte size of a field's binlogs.
    fn update_field_raw_data_size(
        &self,
        field_id: FieldId,
        num_rows: i64,
        data_size: i64,
    ) -> EngineResult<()>;

    /// Rows not deleted.
    fn real_count(&self) -> i64;

    /// Rows held, deleted or not.
    fn row_count(&self) -> i64;

    /// Deleted rows.
    fn deleted_count(&self) -> i64;

    /// Approximate resident bytes.
    fn memory_usage(&self) -> i64;

    /// Whether `field_id`'s values can be served from memory.
    fn has_raw_data(&self, field_id: FieldId) -> bool;
}

/// Creates engines for new segments.
pub trait EngineFactory: Send + Sync {
    /// Creates an empty engine.
    fn create(
        &self,
        schema: &Arc<CollectionSchema>,
        segment_type: SegmentType,
        segment_id: UniqueId,
    ) -> EngineResult<Arc<dyn SegmentEngine>>;
}
