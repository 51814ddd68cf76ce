//! Sealed-path loading: field binlogs, deleted records and indexes.

use super::growing::check_delete_input;
use super::Segment;
use crate::binlog::{FieldBinlog, FieldIndexInfo};
use crate::dispatch::QueryContext;
use crate::engine::{FieldLoadInfo, LoadFieldDataInfo, LoadIndexInfo};
use crate::error::{CoreError, CoreResult};
use crate::metrics::OperationKind;
use crate::types::{id_set_from_keys, PrimaryKey, SegmentType, Timestamp};
use segnode_codec::DataType;
use tracing::info;

impl Segment {
    /// Loads one field's binlogs into the engine.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Unhealthy`] after destruction, or
    /// [`CoreError::Engine`] if the load fails.
    pub fn load_field_data(
        &self,
        field_id: i64,
        row_count: i64,
        field: &FieldBinlog,
    ) -> CoreResult<()> {
        self.load_fields(LoadFieldDataInfo {
            fields: vec![FieldLoadInfo {
                field_id,
                row_count,
                binlog_paths: field.paths(),
            }],
        })?;
        info!(field_id, row_count, segment_id = self.id(), "load field done");
        Ok(())
    }

    /// Loads several fields' binlogs in one engine call.
    ///
    /// # Errors
    ///
    /// As [`Segment::load_field_data`].
    pub fn load_multi_field_data(&self, row_count: i64, fields: &[FieldBinlog]) -> CoreResult<()> {
        self.load_fields(LoadFieldDataInfo {
            fields: fields
                .iter()
                .map(|field| FieldLoadInfo {
                    field_id: field.field_id,
                    row_count,
                    binlog_paths: field.paths(),
                })
                .collect(),
        })?;
        info!(
            row_count,
            fields = fields.len(),
            segment_id = self.id(),
            "load multi field done"
        );
        Ok(())
    }

    fn load_fields(&self, load_info: LoadFieldDataInfo) -> CoreResult<()> {
        let state = self.state.read();
        let engine = self.healthy_engine(&state)?;
        self.run(
            self.runtime.pools.dynamic(),
            OperationKind::LoadFieldData,
            &QueryContext::background(),
            move || engine.load_field_data(&load_info),
        )?
        .map_err(|status| status.into_error("LoadFieldData"))
    }

    /// Loads persisted deletes.
    ///
    /// Until the first delete flush the records are buffered like any
    /// other delete.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Unhealthy`] after destruction
    /// - [`CoreError::InvalidInput`] for empty or mismatched input
    /// - [`CoreError::Engine`] if the load fails
    pub fn load_deleted_record(
        &self,
        pks: &[PrimaryKey],
        timestamps: &[Timestamp],
        row_count: i64,
    ) -> CoreResult<()> {
        check_delete_input(pks, timestamps)?;
        self.ensure_healthy()?;
        if self.delete_buffer.try_append(pks, timestamps)? {
            return Ok(());
        }

        let state = self.state.read();
        let engine = self.healthy_engine(&state)?;
        let blob = segnode_codec::encode(&id_set_from_keys(pks)?)?;
        let timestamps = timestamps.to_vec();

        self.run(
            self.runtime.pools.dynamic(),
            OperationKind::LoadDeletedRecord,
            &QueryContext::background(),
            move || engine.load_deleted_record(&blob, &timestamps, row_count),
        )?
        .map_err(|status| status.into_error("LoadDeletedRecord"))?;

        info!(
            row_count,
            segment_id = self.id(),
            segment_type = %state.segment_type,
            "load deleted record done"
        );
        Ok(())
    }

    /// Installs a sealed index on a field.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidInput`] if the descriptor lists no files or
    ///   `field_type` disagrees with the schema
    /// - [`CoreError::IllegalState`] on a growing segment
    /// - [`CoreError::Unhealthy`] after destruction
    /// - [`CoreError::Engine`] if the engine rejects the index
    pub fn load_index(&self, index: &FieldIndexInfo, field_type: DataType) -> CoreResult<()> {
        let load_info = self.load_index_info(index, field_type)?;

        let state = self.state.read();
        if state.segment_type != SegmentType::Sealed {
            return Err(CoreError::illegal_state(format!(
                "update segment index failed, illegal segment type {} for segment {}",
                state.segment_type,
                self.id()
            )));
        }
        let engine = self.healthy_engine(&state)?;

        self.run(
            self.runtime.pools.dynamic(),
            OperationKind::LoadIndex,
            &QueryContext::background(),
            move || engine.update_sealed_index(&load_info),
        )?
        .map_err(|status| status.into_error("UpdateSealedSegmentIndex"))?;

        info!(
            segment_id = self.id(),
            field_id = index.field_id,
            index_type = %index.index_type,
            "update segment index done"
        );
        Ok(())
    }

    fn load_index_info(
        &self,
        index: &FieldIndexInfo,
        field_type: DataType,
    ) -> CoreResult<LoadIndexInfo> {
        if index.index_file_paths.is_empty() {
            return Err(CoreError::invalid_input(format!(
                "index {} of field {} has no files",
                index.index_id, index.field_id
            )));
        }
        let field = self.schema.field(index.field_id).ok_or_else(|| {
            CoreError::invalid_input(format!("field {} not in schema", index.field_id))
        })?;
        if field.data_type != field_type {
            return Err(CoreError::invalid_input(format!(
                "field {} is {} but the index declares {field_type}",
                index.field_id, field.data_type
            )));
        }

        Ok(LoadIndexInfo {
            field_id: index.field_id,
            field_type,
            index_id: index.index_id,
            build_id: index.build_id,
            index_type: index.index_type.clone(),
            index_files: index.index_file_paths.clone(),
            index_params: index.index_params.clone(),
        })
    }

    /// Reports the total binlog size of a field to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Unhealthy`] after destruction, or
    /// [`CoreError::Engine`] if the engine refuses.
    pub fn update_field_raw_data_size(&self, num_rows: i64, field: &FieldBinlog) -> CoreResult<()> {
        let field_id = field.field_id;
        let data_size = field.total_log_size();

        let state = self.state.read();
        let engine = self.healthy_engine(&state)?;
        self.run(
            self.runtime.pools.dynamic(),
            OperationKind::Stats,
            &QueryContext::background(),
            move || engine.update_field_raw_data_size(field_id, num_rows, data_size),
        )?
        .map_err(|status| status.into_error("UpdateFieldRawDataSize"))?;

        info!(segment_id = self.id(), field_id, data_size, "update field raw data size done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::segment;
    use super::*;
    use crate::binlog::{encode_column, Binlog};
    use crate::config::Config;
    use crate::engine::memory::MemoryEngineFactory;
    use crate::engine::TIMESTAMP_FIELD_ID;
    use crate::segment::{SegmentMeta, SegmentRuntime};
    use crate::types::Endian;
    use segnode_codec::FieldPayload;
    use segnode_storage::InMemoryBlobStore;
    use std::sync::Arc;

    fn index(field_id: i64, index_type: &str) -> FieldIndexInfo {
        FieldIndexInfo {
            field_id,
            enable_index: true,
            index_id: 11,
            build_id: 12,
            index_type: index_type.to_string(),
            index_file_paths: vec![format!("index/{field_id}/0")],
            ..FieldIndexInfo::default()
        }
    }

    fn stored_segment() -> (Arc<MemoryEngineFactory>, Segment) {
        let store = Arc::new(InMemoryBlobStore::new());
        let put = |path: &str, data_type, payload: FieldPayload| {
            store.put(path, encode_column(data_type, &payload, Endian::Little).unwrap());
        };
        put("pk/0", DataType::Int64, FieldPayload::Long(vec![1, 2]));
        put("pk/1", DataType::Int64, FieldPayload::Long(vec![3]));
        put("ts/0", DataType::Int64, FieldPayload::Long(vec![10, 10, 10]));
        put("score/0", DataType::Double, FieldPayload::Double(vec![0.1, 0.2, 0.3]));

        let factory = Arc::new(MemoryEngineFactory::with_store(store, Endian::Little));
        let segment = Segment::new(
            Arc::new(SegmentRuntime::new(Config::new(), Arc::clone(&factory) as _).unwrap()),
            super::super::tests::schema(),
            SegmentMeta::new(1, 2, 3),
            SegmentType::Sealed,
        )
        .unwrap();
        (factory, segment)
    }

    #[test]
    fn loads_fields_from_binlogs() {
        let (_factory, segment) = stored_segment();
        let pk = FieldBinlog::new(
            100,
            vec![Binlog::new("pk/0", 2, 16), Binlog::new("pk/1", 1, 8)],
        );
        segment.load_field_data(100, 3, &pk).unwrap();
        segment
            .load_multi_field_data(
                3,
                &[
                    FieldBinlog::new(TIMESTAMP_FIELD_ID, vec![Binlog::new("ts/0", 3, 24)]),
                    FieldBinlog::new(101, vec![Binlog::new("score/0", 3, 24)]),
                ],
            )
            .unwrap();

        assert_eq!(segment.row_count(), 3);
        assert_eq!(segment.real_count(), 3);
    }

    #[test]
    fn load_failure_is_an_engine_error() {
        let (_factory, segment) = stored_segment();
        let missing = FieldBinlog::new(101, vec![Binlog::new("nope", 3, 24)]);
        let err = segment.load_field_data(101, 3, &missing).unwrap_err();
        assert!(matches!(err, CoreError::Engine { operation: "LoadFieldData", .. }));
    }

    #[test]
    fn deleted_records_buffer_then_load_directly() {
        let (factory, segment) = stored_segment();
        let pk = FieldBinlog::new(100, vec![Binlog::new("pk/0", 2, 16)]);
        segment.load_field_data(100, 2, &pk).unwrap();

        segment
            .load_deleted_record(&[PrimaryKey::Int64(1)], &[5], 2)
            .unwrap();
        assert_eq!(segment.deleted_count(), 0);

        segment.flush_delete().unwrap();
        assert_eq!(segment.deleted_count(), 1);

        segment
            .load_deleted_record(&[PrimaryKey::Int64(2)], &[6], 2)
            .unwrap();
        assert_eq!(segment.deleted_count(), 2);
        assert_eq!(factory.engine(1).unwrap().delete_log().len(), 2);

        assert!(matches!(
            segment.load_deleted_record(&[], &[], 2),
            Err(CoreError::InvalidInput { .. })
        ));
    }

    #[test]
    fn malformed_deleted_records_are_rejected_before_flush() {
        let (factory, segment) = stored_segment();
        let keys: Vec<PrimaryKey> = (0..3).map(PrimaryKey::Int64).collect();

        let err = segment.load_deleted_record(&keys, &[5], 3).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        let err = segment.load_deleted_record(&[], &[], 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));

        segment.flush_delete().unwrap();
        assert_eq!(segment.deleted_count(), 0);
        assert!(factory.engine(1).unwrap().delete_log().is_empty());
    }

    #[test]
    fn index_validation() {
        let (_factory, segment) = stored_segment();

        let mut no_files = index(102, "IVF_PQ");
        no_files.index_file_paths.clear();
        assert!(matches!(
            segment.load_index(&no_files, DataType::FloatVector),
            Err(CoreError::InvalidInput { .. })
        ));
        assert!(matches!(
            segment.load_index(&index(102, "IVF_PQ"), DataType::BinaryVector),
            Err(CoreError::InvalidInput { .. })
        ));
        assert!(matches!(
            segment.load_index(&index(999, "IVF_PQ"), DataType::FloatVector),
            Err(CoreError::InvalidInput { .. })
        ));

        segment
            .load_index(&index(102, "IVF_PQ"), DataType::FloatVector)
            .unwrap();
        assert!(!segment.has_raw_data(102));
    }

    #[test]
    fn index_on_growing_is_illegal() {
        let factory = Arc::new(MemoryEngineFactory::new());
        let segment = segment(&factory, SegmentType::Growing);
        let err = segment
            .load_index(&index(102, "HNSW"), DataType::FloatVector)
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalState { .. }));
    }

    #[test]
    fn raw_data_size_sums_binlogs() {
        let (factory, segment) = stored_segment();
        let field = FieldBinlog::new(
            102,
            vec![Binlog::new("a", 10, 80), Binlog::new("b", 5, 40)],
        );
        segment.update_field_raw_data_size(15, &field).unwrap();
        assert_eq!(factory.engine(1).unwrap().raw_data_size(102), Some((15, 120)));
    }

    #[test]
    fn unhealthy_segment_refuses_loads() {
        let (_factory, segment) = stored_segment();
        segment.flush_delete().unwrap();
        segment.destroy();

        let field = FieldBinlog::new(100, vec![Binlog::new("pk/0", 2, 16)]);
        assert!(segment.load_field_data(100, 2, &field).unwrap_err().is_unhealthy());
        assert!(segment
            .load_multi_field_data(2, std::slice::from_ref(&field))
            .unwrap_err()
            .is_unhealthy());
        assert!(segment
            .load_deleted_record(&[PrimaryKey::Int64(1)], &[1], 1)
            .unwrap_err()
            .is_unhealthy());
        assert!(segment
            .load_index(&index(102, "HNSW"), DataType::FloatVector)
            .unwrap_err()
            .is_unhealthy());
        assert!(segment
            .update_field_raw_data_size(2, &field)
            .unwrap_err()
            .is_unhealthy());
    }

    #[test]
    fn destroyed_segment_refuses_deleted_records_before_flush() {
        let (_factory, segment) = stored_segment();
        segment.destroy();

        let keys: Vec<PrimaryKey> = (0..3).map(PrimaryKey::Int64).collect();
        assert!(segment
            .load_deleted_record(&keys, &[1, 2, 3], 3)
            .unwrap_err()
            .is_unhealthy());
        assert!(segment.flush_delete().is_ok());
        assert_eq!(segment.deleted_count(), -1);
    }
}
