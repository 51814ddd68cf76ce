//! Test fixtures: nodes, schemas, rows and binlogs.
//!
//! A [`TestNode`] bundles an in-memory engine factory and blob store with a
//! runtime, so tests can create segments, write binlogs and inspect engine
//! calls from one handle.

use segnode_codec::{CollectionSchema, DataType, FieldData, FieldPayload, FieldSchema, InsertRecord};
use segnode_core::binlog::encode_column;
use segnode_core::engine::memory::{MemoryEngine, MemoryEngineFactory};
use segnode_core::{
    Binlog, Config, Endian, FieldBinlog, FieldId, PoolConfig, PrimaryKey, Segment, SegmentMeta,
    SegmentRuntime, SegmentType, Timestamp, UniqueId,
};
use segnode_storage::{InMemoryBlobStore, LocalBlobStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Primary key field of [`collection_schema`].
pub const PK_FIELD: FieldId = 100;
/// Double field of [`collection_schema`], holding `pk as f64`.
pub const SCORE_FIELD: FieldId = 101;
/// Float vector field of [`collection_schema`].
pub const VECTOR_FIELD: FieldId = 102;

/// Collection id used by fixture segments.
pub const COLLECTION_ID: UniqueId = 1;
/// Partition id used by fixture segments.
pub const PARTITION_ID: UniqueId = 2;

/// Schema with an int64 key, a double score and a `dim`-wide float vector.
pub fn collection_schema(dim: usize) -> Arc<CollectionSchema> {
    Arc::new(CollectionSchema::new(
        "fixture",
        vec![
            FieldSchema::scalar(PK_FIELD, "pk", DataType::Int64).primary(),
            FieldSchema::scalar(SCORE_FIELD, "score", DataType::Double),
            FieldSchema::vector(VECTOR_FIELD, "vec", DataType::FloatVector, dim),
        ],
    ))
}

/// Deterministic vector for `pk`.
pub fn vector_for(pk: i64, dim: usize) -> Vec<f32> {
    (0..dim).map(|i| pk as f32 + i as f32 / 1000.0).collect()
}

/// Insert record for `pks` matching [`collection_schema`].
pub fn insert_record(pks: &[i64], dim: usize) -> InsertRecord {
    InsertRecord {
        num_rows: pks.len() as i64,
        fields_data: vec![
            FieldData::new(PK_FIELD, DataType::Int64, FieldPayload::Long(pks.to_vec())),
            FieldData::new(
                SCORE_FIELD,
                DataType::Double,
                FieldPayload::Double(pks.iter().map(|&pk| pk as f64).collect()),
            ),
            FieldData::new(
                VECTOR_FIELD,
                DataType::FloatVector,
                FieldPayload::FloatVector {
                    dim,
                    data: pks.iter().flat_map(|&pk| vector_for(pk, dim)).collect(),
                },
            ),
        ],
    }
}

/// Reserves offsets and inserts `pks` into a growing segment.
///
/// Row ids equal the keys. Panics if the insert fails.
pub fn insert_rows(segment: &Segment, pks: &[i64], timestamps: &[Timestamp]) {
    let dim = segment
        .schema()
        .field(VECTOR_FIELD)
        .map_or(0, |field| field.dim);
    let offset = segment
        .pre_insert(pks.len() as i64)
        .expect("Failed to reserve offsets");
    segment
        .insert(offset, pks, timestamps, &insert_record(pks, dim))
        .expect("Failed to insert rows");
}

/// Int64 keys for `range`.
pub fn int_keys(range: std::ops::Range<i64>) -> Vec<PrimaryKey> {
    range.map(PrimaryKey::Int64).collect()
}

/// A query node with an in-memory engine and blob store.
pub struct TestNode {
    /// Shared runtime for every segment of this node.
    pub runtime: Arc<SegmentRuntime>,
    /// Engine factory, for fault injection and call counts.
    pub factory: Arc<MemoryEngineFactory>,
    /// Blob store the engine loads from and retrieve hydrates from.
    pub store: Arc<InMemoryBlobStore>,
    dim: usize,
}

impl TestNode {
    /// Creates a node with 4-dimensional vectors and two workers per pool.
    pub fn new() -> Self {
        Self::with_dim(4)
    }

    /// Creates a node whose schema has `dim`-dimensional vectors.
    pub fn with_dim(dim: usize) -> Self {
        Self::with_config(dim, Self::default_config())
    }

    /// Creates a node with an explicit configuration.
    pub fn with_config(dim: usize, config: Config) -> Self {
        let store = Arc::new(InMemoryBlobStore::new());
        let factory = Arc::new(MemoryEngineFactory::with_store(
            Arc::clone(&store) as _,
            config.endian,
        ));
        let runtime = SegmentRuntime::new(config, Arc::clone(&factory) as _)
            .expect("Failed to start dispatch pools")
            .with_blob_store(Arc::clone(&store) as _);
        Self {
            runtime: Arc::new(runtime),
            factory,
            store,
            dim,
        }
    }

    /// Configuration used by [`TestNode::new`].
    pub fn default_config() -> Config {
        Config::new()
            .node_id(1)
            .dynamic_pool(PoolConfig::new("dynamic").workers(2))
            .query_pool(PoolConfig::new("query").workers(2))
            .bloom_filter(10_000, 0.001)
    }

    /// Vector dimension of this node's schema.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// This node's collection schema.
    pub fn schema(&self) -> Arc<CollectionSchema> {
        collection_schema(self.dim)
    }

    /// Creates a growing segment.
    pub fn growing_segment(&self, segment_id: UniqueId) -> Segment {
        self.segment(segment_id, SegmentType::Growing)
    }

    /// Creates a sealed segment.
    pub fn sealed_segment(&self, segment_id: UniqueId) -> Segment {
        self.segment(segment_id, SegmentType::Sealed)
    }

    fn segment(&self, segment_id: UniqueId, segment_type: SegmentType) -> Segment {
        Segment::new(
            Arc::clone(&self.runtime),
            self.schema(),
            SegmentMeta::new(segment_id, PARTITION_ID, COLLECTION_ID)
                .vchannel(format!("dml_{segment_id}")),
            segment_type,
        )
        .expect("Failed to create segment")
    }

    /// The engine behind `segment_id`, while it is alive.
    pub fn engine(&self, segment_id: UniqueId) -> Option<Arc<MemoryEngine>> {
        self.factory.engine(segment_id)
    }

    /// A binlog writer into this node's store.
    pub fn binlogs(&self) -> BinlogWriter<'_> {
        BinlogWriter::new(&self.store, self.runtime.config().endian)
    }

    /// Creates a sealed segment and loads `pks` with their scores and
    /// vectors from binlogs of `rows_per_binlog` rows each.
    ///
    /// Returns the segment and the vector field's binlogs.
    pub fn loaded_sealed_segment(
        &self,
        segment_id: UniqueId,
        pks: &[i64],
        rows_per_binlog: usize,
    ) -> (Segment, FieldBinlog) {
        let record = insert_record(pks, self.dim);
        let writer = self.binlogs();
        let prefix = format!("seg/{segment_id}");
        let binlogs: Vec<FieldBinlog> = record
            .fields_data
            .iter()
            .map(|field| writer.write_field(&prefix, field, rows_per_binlog))
            .collect();

        let segment = self.sealed_segment(segment_id);
        segment
            .load_multi_field_data(pks.len() as i64, &binlogs)
            .expect("Failed to load field data");
        let vectors = binlogs
            .into_iter()
            .find(|binlog| binlog.field_id == VECTOR_FIELD)
            .expect("Vector binlog missing");
        (segment, vectors)
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes field columns into a blob store as binlogs.
pub struct BinlogWriter<'a> {
    store: &'a InMemoryBlobStore,
    endian: Endian,
}

impl<'a> BinlogWriter<'a> {
    /// Creates a writer.
    pub fn new(store: &'a InMemoryBlobStore, endian: Endian) -> Self {
        Self { store, endian }
    }

    /// Splits `field` into binlogs of at most `rows_per_binlog` rows under
    /// `prefix/{field_id}/{n}`.
    pub fn write_field(&self, prefix: &str, field: &FieldData, rows_per_binlog: usize) -> FieldBinlog {
        let rows = field.num_rows();
        let chunk = rows_per_binlog.max(1);
        let mut binlogs = Vec::new();
        let mut start = 0;
        while start < rows {
            let end = (start + chunk).min(rows);
            let indices: Vec<usize> = (start..end).collect();
            let payload = field
                .payload
                .take_rows(&indices)
                .expect("Failed to slice column");
            let bytes = encode_column(field.data_type, &payload, self.endian)
                .expect("Failed to encode column");
            let path = format!("{prefix}/{}/{}", field.field_id, binlogs.len());
            let size = bytes.len() as i64;
            self.store.put(path.clone(), bytes);
            binlogs.push(Binlog::new(path, (end - start) as i64, size));
            start = end;
        }
        FieldBinlog::new(field.field_id, binlogs)
    }
}

/// A directory-backed blob store that is removed on drop.
pub struct TempBlobStore {
    /// The store.
    pub store: Arc<LocalBlobStore>,
    _dir: TempDir,
}

impl TempBlobStore {
    /// Creates an empty store in a fresh temporary directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = LocalBlobStore::open(dir.path()).expect("Failed to open blob store");
        Self {
            store: Arc::new(store),
            _dir: dir,
        }
    }
}

impl Default for TempBlobStore {
    fn default() -> Self {
        Self::new()
    }
}
