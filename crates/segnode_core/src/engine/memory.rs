//! In-memory segment engine.
//!
//! A plain columnar row store that honours the [`SegmentEngine`] contract.
//! Suitable for:
//! - Unit and integration tests
//! - Nodes that do not link a native engine
//!
//! Search is brute force over float vectors. Sealed segments load binlogs
//! through a [`BlobStore`]. Loading an index whose type does not retain raw
//! vectors moves the field out of the retrievable columns, so retrieve
//! returns zero-filled rows for it, as a native engine would.
//!
//! The factory can inject failures and latency per operation name, and
//! counts live engines and engine calls.

use super::{
    EngineFactory, EngineResult, EngineStatus, LoadFieldDataInfo, LoadIndexInfo, MetricType,
    RetrievePlan, RetrievePredicate, SearchHit, SearchPlan, SearchResult, SegmentEngine,
    ROW_ID_FIELD_ID, TIMESTAMP_FIELD_ID,
};
use crate::binlog::decode_column;
use crate::types::{
    id_set_from_keys, keys_from_id_set, Endian, FieldId, PrimaryKey, SegmentType, Timestamp,
    UniqueId,
};
use parking_lot::{Mutex, RwLock};
use segnode_codec::{
    CollectionSchema, DataType, FieldData, FieldPayload, FieldSchema, IdSet, InsertRecord,
    RetrieveResults,
};
use segnode_storage::BlobStore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Index types whose index keeps the original vectors.
const RAW_DATA_INDEX_TYPES: &[&str] = &["FLAT", "IVF_FLAT", "BIN_FLAT", "BIN_IVF_FLAT", "HNSW"];

/// Returns true if an index of `index_type` can serve raw vectors.
#[must_use]
pub fn index_retains_raw_data(index_type: &str) -> bool {
    RAW_DATA_INDEX_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(index_type))
}

#[derive(Debug, Default)]
struct Faults {
    failing: RwLock<HashSet<&'static str>>,
    latency: RwLock<Duration>,
    calls: AtomicU64,
}

impl Faults {
    fn enter(&self, operation: &'static str) -> EngineResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let latency = *self.latency.read();
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        if self.failing.read().contains(operation) {
            return Err(EngineStatus::new(
                EngineStatus::UNEXPECTED,
                format!("injected {operation} failure"),
            ));
        }
        Ok(())
    }
}

/// Creates [`MemoryEngine`]s.
pub struct MemoryEngineFactory {
    store: Option<Arc<dyn BlobStore>>,
    endian: Endian,
    faults: Arc<Faults>,
    live: Arc<AtomicUsize>,
    engines: Mutex<HashMap<UniqueId, Weak<MemoryEngine>>>,
}

impl MemoryEngineFactory {
    /// A factory whose engines cannot load binlogs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: None,
            endian: Endian::Little,
            faults: Arc::new(Faults::default()),
            live: Arc::new(AtomicUsize::new(0)),
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// A factory whose engines load binlogs from `store`.
    #[must_use]
    pub fn with_store(store: Arc<dyn BlobStore>, endian: Endian) -> Self {
        Self {
            store: Some(store),
            endian,
            ..Self::new()
        }
    }

    /// Makes every later call named `operation` fail, e.g. `"Delete"`.
    ///
    /// `"Create"` makes engine creation fail.
    pub fn fail_on(&self, operation: &'static str) {
        self.faults.failing.write().insert(operation);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.faults.failing.write().clear();
    }

    /// Delays every engine call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.write() = latency;
    }

    /// Engines created and not yet dropped.
    #[must_use]
    pub fn live_engines(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Engine calls made across all engines.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.faults.calls.load(Ordering::Relaxed)
    }

    /// The live engine for `segment_id`, if any.
    ///
    /// Holding the returned handle keeps the engine alive.
    #[must_use]
    pub fn engine(&self, segment_id: UniqueId) -> Option<Arc<MemoryEngine>> {
        self.engines.lock().get(&segment_id).and_then(Weak::upgrade)
    }
}

impl Default for MemoryEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngineFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngineFactory")
            .field("has_store", &self.store.is_some())
            .field("endian", &self.endian)
            .field("live", &self.live_engines())
            .finish()
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn create(
        &self,
        schema: &Arc<CollectionSchema>,
        segment_type: SegmentType,
        segment_id: UniqueId,
    ) -> EngineResult<Arc<dyn SegmentEngine>> {
        self.faults.enter("Create")?;
        let pk_field = schema
            .primary_key()
            .cloned()
            .ok_or_else(|| invalid("schema has no primary key field"))?;

        let engine = Arc::new(MemoryEngine {
            schema: Arc::clone(schema),
            pk_field,
            segment_type,
            store: self.store.clone(),
            endian: self.endian,
            faults: Arc::clone(&self.faults),
            live: Arc::clone(&self.live),
            state: RwLock::new(EngineState::default()),
        });
        self.live.fetch_add(1, Ordering::SeqCst);

        let mut engines = self.engines.lock();
        engines.retain(|_, weak| weak.strong_count() > 0);
        engines.insert(segment_id, Arc::downgrade(&engine));
        Ok(engine)
    }
}

#[derive(Debug, Default)]
struct EngineState {
    reserved: i64,
    row_count: usize,
    pks: Vec<PrimaryKey>,
    timestamps: Vec<Timestamp>,
    columns: HashMap<FieldId, FieldPayload>,
    index_vectors: HashMap<FieldId, FieldPayload>,
    indexes: HashMap<FieldId, LoadIndexInfo>,
    deletes: HashMap<PrimaryKey, Vec<Timestamp>>,
    delete_log: Vec<(PrimaryKey, Timestamp)>,
    raw_sizes: HashMap<FieldId, (i64, i64)>,
}

impl EngineState {
    /// Extends the row space to `rows`; new rows carry timestamp `fill`.
    fn grow_to(&mut self, rows: usize, fill: Timestamp) {
        if rows > self.row_count {
            self.row_count = rows;
        }
        if self.timestamps.len() < self.row_count {
            self.timestamps.resize(self.row_count, fill);
        }
        if self.pks.len() < self.row_count {
            self.pks.resize(self.row_count, PrimaryKey::Int64(0));
        }
    }

    fn visible(&self, row: usize, ts: Timestamp) -> bool {
        let row_ts = self.timestamps[row];
        if row_ts > ts {
            return false;
        }
        !self
            .deletes
            .get(&self.pks[row])
            .is_some_and(|dels| dels.iter().any(|&d| d >= row_ts && d <= ts))
    }

    fn apply_deletes(&mut self, keys: Vec<PrimaryKey>, timestamps: &[Timestamp]) {
        for (pk, &ts) in keys.into_iter().zip(timestamps) {
            self.deletes.entry(pk.clone()).or_default().push(ts);
            self.delete_log.push((pk, ts));
        }
    }
}

/// A columnar in-memory engine for one segment.
pub struct MemoryEngine {
    schema: Arc<CollectionSchema>,
    pk_field: FieldSchema,
    segment_type: SegmentType,
    store: Option<Arc<dyn BlobStore>>,
    endian: Endian,
    faults: Arc<Faults>,
    live: Arc<AtomicUsize>,
    state: RwLock<EngineState>,
}

impl MemoryEngine {
    /// The type the engine was created as.
    #[must_use]
    pub fn segment_type(&self) -> SegmentType {
        self.segment_type
    }

    /// Every applied delete, in application order.
    #[must_use]
    pub fn delete_log(&self) -> Vec<(PrimaryKey, Timestamp)> {
        self.state.read().delete_log.clone()
    }

    /// The `(num_rows, data_size)` last reported for `field_id`.
    #[must_use]
    pub fn raw_data_size(&self, field_id: FieldId) -> Option<(i64, i64)> {
        self.state.read().raw_sizes.get(&field_id).copied()
    }

    /// The index installed on `field_id`, if any.
    #[must_use]
    pub fn index(&self, field_id: FieldId) -> Option<LoadIndexInfo> {
        self.state.read().indexes.get(&field_id).cloned()
    }

    fn field(&self, field_id: FieldId) -> EngineResult<&FieldSchema> {
        self.schema.field(field_id).ok_or_else(|| {
            EngineStatus::new(
                EngineStatus::NOT_FOUND,
                format!("field {field_id} not in schema"),
            )
        })
    }

    fn decode_keys(&self, ids: &[u8], timestamps: &[Timestamp]) -> EngineResult<Vec<PrimaryKey>> {
        let ids: IdSet = segnode_codec::decode(ids).map_err(|e| invalid(e.to_string()))?;
        if ids.len() != timestamps.len() {
            return Err(invalid(format!(
                "{} keys with {} timestamps",
                ids.len(),
                timestamps.len()
            )));
        }
        Ok(keys_from_id_set(&ids))
    }

    fn read_column(&self, field: &FieldSchema, paths: &[String]) -> EngineResult<FieldPayload> {
        let store = self.store.as_ref().ok_or_else(|| {
            EngineStatus::new(EngineStatus::NOT_FOUND, "engine has no blob store")
        })?;
        let mut column = FieldPayload::empty(field.data_type, field.dim);
        for path in paths {
            let bytes = store
                .read(path)
                .map_err(|e| EngineStatus::new(EngineStatus::NOT_FOUND, e.to_string()))?;
            let part = decode_column(field.data_type, field.dim, &bytes, self.endian)
                .map_err(|e| invalid(e.to_string()))?;
            let at = column.num_rows();
            column
                .write_rows(at, &part)
                .map_err(|e| invalid(e.to_string()))?;
        }
        Ok(column)
    }

    fn output_column(
        &self,
        state: &EngineState,
        field: &FieldSchema,
        rows: &[usize],
    ) -> EngineResult<FieldPayload> {
        if field.field_id == self.pk_field.field_id {
            let keys: Vec<PrimaryKey> = rows.iter().map(|&r| state.pks[r].clone()).collect();
            return pk_payload(self.pk_field.data_type, &keys);
        }

        match state.columns.get(&field.field_id) {
            Some(column) if column.num_rows() >= state.row_count => {
                column.take_rows(rows).map_err(|e| invalid(e.to_string()))
            }
            Some(column) => {
                let mut padded = column.clone();
                padded.resize_rows(state.row_count);
                padded.take_rows(rows).map_err(|e| invalid(e.to_string()))
            }
            None => {
                let mut empty = FieldPayload::empty(field.data_type, field.dim);
                empty.resize_rows(rows.len());
                Ok(empty)
            }
        }
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("segment_type", &self.segment_type)
            .field("rows", &self.state.read().row_count)
            .finish()
    }
}

impl SegmentEngine for MemoryEngine {
    fn pre_insert(&self, num_rows: i64) -> EngineResult<i64> {
        self.faults.enter("PreInsert")?;
        if num_rows < 0 {
            return Err(invalid("negative row count"));
        }
        let mut state = self.state.write();
        let offset = state.reserved;
        state.reserved += num_rows;
        Ok(offset)
    }

    fn insert(
        &self,
        offset: i64,
        row_ids: &[i64],
        timestamps: &[Timestamp],
        record: &[u8],
    ) -> EngineResult<()> {
        self.faults.enter("Insert")?;
        if self.segment_type != SegmentType::Growing {
            return Err(invalid("insert into a sealed segment"));
        }
        let record: InsertRecord =
            segnode_codec::decode(record).map_err(|e| invalid(e.to_string()))?;
        record.validate().map_err(|e| invalid(e.to_string()))?;

        let rows = usize::try_from(record.num_rows).map_err(|_| invalid("negative num_rows"))?;
        let at = usize::try_from(offset).map_err(|_| invalid("negative offset"))?;
        if row_ids.len() != rows || timestamps.len() != rows {
            return Err(invalid(format!(
                "{rows} rows with {} row ids and {} timestamps",
                row_ids.len(),
                timestamps.len()
            )));
        }

        let pk_data = record
            .fields_data
            .iter()
            .find(|f| f.field_id == self.pk_field.field_id)
            .ok_or_else(|| invalid("insert record lacks the primary key field"))?;
        let pks = keys_from_payload(&pk_data.payload)?;
        if pks.len() != rows {
            return Err(invalid(format!("{rows} rows with {} keys", pks.len())));
        }

        let mut state = self.state.write();
        // Reserved rows stay invisible until written.
        state.grow_to(at + rows, Timestamp::MAX);
        state.pks[at..at + rows].clone_from_slice(&pks);
        state.timestamps[at..at + rows].copy_from_slice(timestamps);
        for field in &record.fields_data {
            if field.field_id == self.pk_field.field_id {
                continue;
            }
            let schema_field = self.field(field.field_id)?;
            state
                .columns
                .entry(field.field_id)
                .or_insert_with(|| FieldPayload::empty(schema_field.data_type, schema_field.dim))
                .write_rows(at, &field.payload)
                .map_err(|e| invalid(e.to_string()))?;
        }
        Ok(())
    }

    fn delete(&self, ids: &[u8], timestamps: &[Timestamp]) -> EngineResult<()> {
        self.faults.enter("Delete")?;
        let keys = self.decode_keys(ids, timestamps)?;
        self.state.write().apply_deletes(keys, timestamps);
        Ok(())
    }

    fn search(
        &self,
        plan: &SearchPlan,
        placeholder: &[u8],
        timestamp: Timestamp,
    ) -> EngineResult<SearchResult> {
        self.faults.enter("Search")?;
        let queries: FieldPayload =
            segnode_codec::decode(placeholder).map_err(|e| invalid(e.to_string()))?;
        let FieldPayload::FloatVector {
            dim,
            data: query_data,
        } = queries
        else {
            return Err(invalid("placeholder must hold float vectors"));
        };

        let state = self.state.read();
        let vectors = state
            .columns
            .get(&plan.field_id)
            .or_else(|| state.index_vectors.get(&plan.field_id))
            .ok_or_else(|| {
                EngineStatus::new(
                    EngineStatus::NOT_FOUND,
                    format!("field {} is not loaded", plan.field_id),
                )
            })?;
        let FieldPayload::FloatVector {
            dim: field_dim,
            data,
        } = vectors
        else {
            return Err(invalid("search field is not a float vector"));
        };
        if *field_dim != dim || dim == 0 {
            return Err(invalid(format!(
                "query dim {dim} does not match field dim {field_dim}"
            )));
        }

        let stored = data.len() / dim;
        let mut hits = Vec::new();
        for query in query_data.chunks_exact(dim) {
            let mut scored: Vec<SearchHit> = (0..state.row_count.min(stored))
                .filter(|&row| state.visible(row, timestamp))
                .map(|row| SearchHit {
                    pk: state.pks[row].clone(),
                    offset: row as i64,
                    score: score(plan.metric_type, query, &data[row * dim..(row + 1) * dim]),
                })
                .collect();
            match plan.metric_type {
                MetricType::L2 => scored.sort_by(|a, b| a.score.total_cmp(&b.score)),
                MetricType::Ip => scored.sort_by(|a, b| b.score.total_cmp(&a.score)),
            }
            scored.truncate(plan.topk);
            hits.push(scored);
        }
        Ok(SearchResult { hits })
    }

    fn retrieve(&self, plan: &RetrievePlan, _max_output_size: i64) -> EngineResult<Vec<u8>> {
        self.faults.enter("Retrieve")?;
        let state = self.state.read();

        let wanted: Option<HashSet<&PrimaryKey>> = match &plan.predicate {
            RetrievePredicate::All => None,
            RetrievePredicate::PkIn(keys) => Some(keys.iter().collect()),
        };
        let rows: Vec<usize> = (0..state.row_count)
            .filter(|&row| state.visible(row, plan.timestamp))
            .filter(|&row| wanted.as_ref().map_or(true, |w| w.contains(&state.pks[row])))
            .collect();

        let keys: Vec<PrimaryKey> = rows.iter().map(|&r| state.pks[r].clone()).collect();
        let mut ids = id_set_from_keys(&keys).map_err(|e| invalid(e.to_string()))?;
        if keys.is_empty() && self.pk_field.data_type == DataType::VarChar {
            ids = IdSet::Str(Vec::new());
        }

        let mut fields_data = Vec::with_capacity(plan.output_field_ids.len());
        for &field_id in &plan.output_field_ids {
            let field = self.field(field_id)?;
            let payload = self.output_column(&state, field, &rows)?;
            fields_data.push(FieldData::new(field_id, field.data_type, payload));
        }

        let results = RetrieveResults {
            ids,
            offsets: rows.iter().map(|&r| r as i64).collect(),
            fields_data,
        };
        segnode_codec::encode(&results).map_err(|e| invalid(e.to_string()))
    }

    fn load_field_data(&self, info: &LoadFieldDataInfo) -> EngineResult<()> {
        self.faults.enter("LoadFieldData")?;
        for load in &info.fields {
            let rows =
                usize::try_from(load.row_count).map_err(|_| invalid("negative row count"))?;
            if load.field_id == ROW_ID_FIELD_ID {
                continue;
            }

            let field = if load.field_id == TIMESTAMP_FIELD_ID {
                FieldSchema::scalar(TIMESTAMP_FIELD_ID, "timestamp", DataType::Int64)
            } else {
                self.field(load.field_id)?.clone()
            };
            let column = self.read_column(&field, &load.binlog_paths)?;
            if column.num_rows() != rows {
                return Err(invalid(format!(
                    "field {} holds {} rows, expected {rows}",
                    load.field_id,
                    column.num_rows()
                )));
            }

            let mut state = self.state.write();
            // Loaded rows are visible unless a timestamp column says otherwise.
            state.grow_to(rows, 0);

            if load.field_id == TIMESTAMP_FIELD_ID {
                let FieldPayload::Long(values) = column else {
                    return Err(invalid("timestamp column must be int64"));
                };
                for (slot, v) in state.timestamps.iter_mut().zip(values) {
                    *slot = v as Timestamp;
                }
            } else if load.field_id == self.pk_field.field_id {
                let keys = keys_from_payload(&column)?;
                state.pks[..keys.len()].clone_from_slice(&keys);
            } else if state.indexes.get(&load.field_id).is_some_and(|idx| {
                field.data_type.is_vector() && !index_retains_raw_data(&idx.index_type)
            }) {
                state.index_vectors.insert(load.field_id, column);
            } else {
                state.columns.insert(load.field_id, column);
            }
        }
        Ok(())
    }

    fn load_deleted_record(
        &self,
        ids: &[u8],
        timestamps: &[Timestamp],
        _row_count: i64,
    ) -> EngineResult<()> {
        self.faults.enter("LoadDeletedRecord")?;
        let keys = self.decode_keys(ids, timestamps)?;
        self.state.write().apply_deletes(keys, timestamps);
        Ok(())
    }

    fn update_sealed_index(&self, info: &LoadIndexInfo) -> EngineResult<()> {
        self.faults.enter("UpdateSealedIndex")?;
        if self.segment_type != SegmentType::Sealed {
            return Err(invalid("sealed index on a growing segment"));
        }
        let field = self.field(info.field_id)?;
        if field.data_type != info.field_type {
            return Err(invalid(format!(
                "index declares {} but field {} is {}",
                info.field_type, info.field_id, field.data_type
            )));
        }

        let mut state = self.state.write();
        if field.data_type.is_vector() && !index_retains_raw_data(&info.index_type) {
            if let Some(column) = state.columns.remove(&info.field_id) {
                state.index_vectors.insert(info.field_id, column);
            }
        }
        state.indexes.insert(info.field_id, info.clone());
        Ok(())
    }

    fn update_field_raw_data_size(
        &self,
        field_id: FieldId,
        num_rows: i64,
        data_size: i64,
    ) -> EngineResult<()> {
        self.faults.enter("UpdateFieldRawDataSize")?;
        self.field(field_id)?;
        self.state
            .write()
            .raw_sizes
            .insert(field_id, (num_rows, data_size));
        Ok(())
    }

    fn real_count(&self) -> i64 {
        let _ = self.faults.enter("GetRealCount");
        let state = self.state.read();
        (0..state.row_count)
            .filter(|&row| state.visible(row, Timestamp::MAX - 1))
            .count() as i64
    }

    fn row_count(&self) -> i64 {
        let _ = self.faults.enter("GetRowCount");
        self.state.read().row_count as i64
    }

    fn deleted_count(&self) -> i64 {
        let _ = self.faults.enter("GetDeletedCount");
        self.state.read().deletes.len() as i64
    }

    fn memory_usage(&self) -> i64 {
        let _ = self.faults.enter("GetMemoryUsage");
        let state = self.state.read();
        let columns: usize = state
            .columns
            .values()
            .chain(state.index_vectors.values())
            .map(payload_bytes)
            .sum();
        (columns + state.row_count * 16) as i64
    }

    fn has_raw_data(&self, field_id: FieldId) -> bool {
        let _ = self.faults.enter("HasRawData");
        match self.state.read().indexes.get(&field_id) {
            Some(index) => index_retains_raw_data(&index.index_type),
            None => true,
        }
    }
}

fn invalid(message: impl Into<String>) -> EngineStatus {
    EngineStatus::new(EngineStatus::INVALID_ARGUMENT, message)
}

fn keys_from_payload(payload: &FieldPayload) -> EngineResult<Vec<PrimaryKey>> {
    match payload {
        FieldPayload::Long(v) => Ok(v.iter().copied().map(PrimaryKey::Int64).collect()),
        FieldPayload::String(v) => Ok(v.iter().cloned().map(PrimaryKey::VarChar).collect()),
        _ => Err(invalid("primary key field must be int64 or varchar")),
    }
}

fn pk_payload(data_type: DataType, keys: &[PrimaryKey]) -> EngineResult<FieldPayload> {
    let mut payload = FieldPayload::empty(data_type, 0);
    for key in keys {
        match (&mut payload, key) {
            (FieldPayload::Long(v), PrimaryKey::Int64(k)) => v.push(*k),
            (FieldPayload::String(v), PrimaryKey::VarChar(k)) => v.push(k.clone()),
            _ => return Err(invalid(format!("key {key} does not match {data_type}"))),
        }
    }
    Ok(payload)
}

fn payload_bytes(payload: &FieldPayload) -> usize {
    match payload {
        FieldPayload::Bool(v) => v.len(),
        FieldPayload::Int(v) => v.len() * 4,
        FieldPayload::Long(v) => v.len() * 8,
        FieldPayload::Float(v) => v.len() * 4,
        FieldPayload::Double(v) => v.len() * 8,
        FieldPayload::String(v) => v.iter().map(String::len).sum(),
        FieldPayload::FloatVector { data, .. } => data.len() * 4,
        FieldPayload::BinaryVector { data, .. } => data.len(),
    }
}

fn score(metric: MetricType, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        MetricType::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        MetricType::Ip => a.iter().zip(b).map(|(x, y)| x * y).sum(),
    }
}
