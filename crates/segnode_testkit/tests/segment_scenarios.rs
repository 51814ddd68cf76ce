//! End-to-end segment scenarios against the in-memory engine.

use proptest::prelude::*;
use segnode_codec::{DataType, FieldPayload, IdSet};
use segnode_core::delete_buffer::DeleteBuffer;
use segnode_core::engine::{RetrievePlan, RetrievePredicate};
use segnode_core::{
    CoreError, FieldIndexInfo, IndexedFieldInfo, PrimaryKey, QueryContext, SegmentType, Timestamp,
};
use segnode_testkit::prelude::*;
use std::sync::Arc;

fn pk_lookup(pks: Vec<i64>, fields: Vec<i64>) -> RetrievePlan {
    RetrievePlan {
        msg_id: 1,
        timestamp: Timestamp::MAX - 1,
        predicate: RetrievePredicate::PkIn(pks.into_iter().map(PrimaryKey::Int64).collect()),
        output_field_ids: fields,
    }
}

#[test]
fn insert_then_delete_half() {
    init_test_logging();
    let node = TestNode::new();
    let segment = node.growing_segment(1);

    let pks: Vec<i64> = (0..100).collect();
    let timestamps: Vec<Timestamp> = (1..=100).collect();
    insert_rows(&segment, &pks, &timestamps);
    segment.update_bloom_filter(&int_keys(0..100)).unwrap();

    let deleted = int_keys(0..50);
    let delete_ts: Vec<Timestamp> = (101..=150).collect();
    segment.delete(&deleted, &delete_ts).unwrap();
    assert_eq!(segment.deleted_count(), 0);
    assert!(!segment.is_delete_flushed());

    segment.flush_delete().unwrap();
    assert_eq!(segment.deleted_count(), 50);
    assert_eq!(segment.real_count(), 50);
    assert_eq!(segment.row_count(), 100);
    assert_eq!(segment.flushed_delete_timestamp(), 150);

    // Deleted keys stay in the filter.
    assert!(segment.is_pk_exist(&PrimaryKey::Int64(0)));
    assert!(segment.is_pk_exist(&PrimaryKey::Int64(99)));
}

#[test]
fn flushed_buffer_never_buffers_again() {
    let buffer = DeleteBuffer::new();
    buffer.flush(|_, _| Ok(())).unwrap();
    assert!(buffer.is_flushed());

    assert!(!buffer.try_append(&[PrimaryKey::Int64(1)], &[5]).unwrap());
    assert!(!buffer.try_append(&[], &[]).unwrap());
    assert!(!buffer.try_append(&[PrimaryKey::from("x")], &[1, 2]).unwrap());
    assert!(buffer.is_empty());
}

#[test]
fn malformed_deleted_records_never_reach_the_engine() {
    let node = TestNode::new();
    let (segment, _) = node.loaded_sealed_segment(11, &[0, 1, 2], 2);

    assert!(segment.load_deleted_record(&int_keys(0..3), &[5], 3).is_err());
    assert!(segment.load_deleted_record(&[], &[], 0).is_err());
    segment.flush_delete().unwrap();
    assert_eq!(segment.deleted_count(), 0);

    segment.load_deleted_record(&int_keys(0..3), &[5, 6, 7], 3).unwrap();
    assert_eq!(segment.deleted_count(), 3);
}

#[test]
fn destroyed_segment_rejects_buffered_work() {
    let node = TestNode::new();
    let segment = node.growing_segment(12);
    insert_rows(&segment, &[0, 1, 2], &[1, 1, 1]);
    segment.update_bloom_filter(&int_keys(0..3)).unwrap();
    segment.destroy();

    assert!(segment.delete(&int_keys(0..3), &[1, 2, 3]).unwrap_err().is_unhealthy());
    assert!(segment
        .load_deleted_record(&int_keys(0..3), &[1, 2, 3], 3)
        .unwrap_err()
        .is_unhealthy());
    assert!(segment.update_bloom_filter(&int_keys(0..3)).unwrap_err().is_unhealthy());
    assert!(!segment.is_pk_exist(&PrimaryKey::Int64(1)));
}

#[test]
fn deletes_after_flush_apply_directly() {
    let node = TestNode::new();
    let segment = node.growing_segment(2);
    insert_rows(&segment, &[1, 2, 3], &[1, 1, 1]);

    segment.flush_delete().unwrap();
    assert!(segment.is_delete_flushed());
    assert_eq!(segment.flushed_delete_timestamp(), 0);

    segment.delete(&[PrimaryKey::Int64(2)], &[10]).unwrap();
    assert_eq!(segment.deleted_count(), 1);
    assert_eq!(segment.flushed_delete_timestamp(), 10);
}

#[test]
fn retrieve_hydrates_wide_vectors_from_binlogs() {
    init_test_logging();
    let node = TestNode::with_dim(128);
    let pks: Vec<i64> = (0..10).collect();
    let (segment, vectors) = node.loaded_sealed_segment(3, &pks, 4);

    let index = FieldIndexInfo {
        field_id: VECTOR_FIELD,
        enable_index: true,
        index_name: "vec_index".into(),
        index_id: 11,
        build_id: 12,
        index_type: "IVF_PQ".into(),
        index_file_paths: vec!["index/3/102".into()],
        ..FieldIndexInfo::default()
    };
    segment.load_index(&index, DataType::FloatVector).unwrap();
    segment.set_indexed_field_info(
        VECTOR_FIELD,
        IndexedFieldInfo {
            field_binlog: vectors,
            index_info: Some(index),
        },
    );
    assert!(!segment.has_raw_data(VECTOR_FIELD));

    let results = segment
        .retrieve(&pk_lookup(vec![5], vec![VECTOR_FIELD]), &QueryContext::background())
        .unwrap();

    // Row 5 is row 1 of the second binlog: one 512-byte read at 512.
    assert_eq!(
        node.store.last_range(),
        Some(("seg/3/102/1".to_string(), 512, 512))
    );
    assert_eq!(results.ids, IdSet::Int(vec![5]));
    assert_eq!(
        results.fields_data[0].payload,
        FieldPayload::FloatVector {
            dim: 128,
            data: vector_for(5, 128)
        }
    );
}

#[test]
fn raw_data_index_skips_hydration() {
    let node = TestNode::new();
    let (segment, vectors) = node.loaded_sealed_segment(4, &[1, 2, 3], 2);
    let index = FieldIndexInfo {
        field_id: VECTOR_FIELD,
        enable_index: true,
        index_type: "HNSW".into(),
        index_file_paths: vec!["index/4/102".into()],
        ..FieldIndexInfo::default()
    };
    segment.load_index(&index, DataType::FloatVector).unwrap();
    segment.set_indexed_field_info(
        VECTOR_FIELD,
        IndexedFieldInfo {
            field_binlog: vectors,
            index_info: Some(index),
        },
    );

    let before = node.store.ranged_reads();
    let results = segment
        .retrieve(&pk_lookup(vec![2], vec![VECTOR_FIELD]), &QueryContext::background())
        .unwrap();
    assert_eq!(node.store.ranged_reads(), before);
    assert_eq!(
        results.fields_data[0].payload,
        FieldPayload::FloatVector {
            dim: 4,
            data: vector_for(2, 4)
        }
    );
}

#[test]
fn missing_binlog_fails_the_whole_retrieve() {
    let node = TestNode::new();
    let (segment, vectors) = node.loaded_sealed_segment(5, &[1, 2], 1);
    let index = FieldIndexInfo {
        field_id: VECTOR_FIELD,
        enable_index: true,
        index_type: "IVF_SQ8".into(),
        index_file_paths: vec!["index/5/102".into()],
        ..FieldIndexInfo::default()
    };
    segment.load_index(&index, DataType::FloatVector).unwrap();
    segment.set_indexed_field_info(
        VECTOR_FIELD,
        IndexedFieldInfo {
            field_binlog: vectors,
            index_info: Some(index),
        },
    );
    node.store.remove("seg/5/102/1");

    let err = segment
        .retrieve(&pk_lookup(vec![1, 2], vec![VECTOR_FIELD]), &QueryContext::background())
        .unwrap_err();
    assert!(matches!(err, CoreError::Hydration { ref path, .. } if path == "seg/5/102/1"));
}

#[test]
fn destroyed_segment_makes_no_engine_calls() {
    let node = TestNode::new();
    let segment = node.growing_segment(6);
    insert_rows(&segment, &[1, 2], &[1, 1]);
    segment.flush_delete().unwrap();
    segment.destroy();
    assert!(node.engine(6).is_none());

    let calls = node.factory.total_calls();
    let ctx = QueryContext::background();
    assert!(segment.pre_insert(1).unwrap_err().is_unhealthy());
    assert!(segment
        .delete(&[PrimaryKey::Int64(1)], &[5])
        .unwrap_err()
        .is_unhealthy());
    assert!(segment
        .retrieve(&pk_lookup(vec![1], vec![]), &ctx)
        .unwrap_err()
        .is_unhealthy());
    assert_eq!(segment.row_count(), -1);
    assert_eq!(segment.mem_size(), -1);
    assert!(!segment.has_raw_data(VECTOR_FIELD));
    assert_eq!(node.factory.total_calls(), calls);
}

#[test]
fn sealed_segment_rejects_growing_operations() {
    let node = TestNode::new();
    let segment = node.sealed_segment(7);
    assert_eq!(segment.pre_insert(10).unwrap(), 0);
    let err = segment
        .insert(0, &[1], &[1], &insert_record(&[1], node.dim()))
        .unwrap_err();
    assert!(matches!(err, CoreError::IllegalState { .. }));
    assert_eq!(segment.segment_type(), SegmentType::Sealed);
}

#[test]
fn growing_segment_can_be_sealed() {
    let node = TestNode::new();
    let segment = node.growing_segment(8);
    insert_rows(&segment, &[1], &[1]);
    segment.set_type(SegmentType::Sealed).unwrap();
    assert_eq!(segment.pre_insert(1).unwrap(), 0);
    assert!(segment.set_type(SegmentType::Growing).is_err());
}

#[test]
fn queries_race_with_destroy() {
    let node = TestNode::new();
    let segment = Arc::new(node.growing_segment(9));
    let pks: Vec<i64> = (0..200).collect();
    insert_rows(&segment, &pks, &vec![1; pks.len()]);
    segment.flush_delete().unwrap();

    let config = StressConfig {
        threads: 4,
        operations: 100,
        destroy_after: Some(50),
        ..StressConfig::default()
    };
    let result = stress_mixed_queries(Arc::clone(&segment), &config);

    assert_eq!(result.total_ops(), 400);
    assert_eq!(result.failed_ops, 0);
    assert!(!segment.is_healthy());
    assert_eq!(node.factory.live_engines(), 0);
}

fn ordered_stream() -> impl Strategy<Value = (Vec<(i64, Timestamp)>, usize)> {
    (
        prop::collection::vec((0..40i64, 1..500u64), 1..60),
        1..8usize,
    )
        .prop_map(|(mut deletes, batch)| {
            // Batch boundaries must not split equal timestamps.
            deletes.sort_by_key(|&(_, ts)| ts);
            deletes.dedup_by_key(|&mut (_, ts)| ts);
            (deletes, batch)
        })
}

fn split(deletes: &[(i64, Timestamp)]) -> (Vec<PrimaryKey>, Vec<Timestamp>) {
    deletes
        .iter()
        .map(|&(pk, ts)| (PrimaryKey::Int64(pk), ts))
        .unzip()
}

proptest! {
    #![proptest_config(segment_proptest_config(24))]

    #[test]
    fn buffered_and_direct_deletes_agree((deletes, batch) in ordered_stream()) {
        let node = TestNode::new();
        let pks: Vec<i64> = (0..40).collect();

        let buffered = node.growing_segment(100);
        insert_rows(&buffered, &pks, &vec![1; pks.len()]);
        for chunk in deletes.chunks(batch) {
            let (keys, ts) = split(chunk);
            buffered.delete(&keys, &ts).unwrap();
        }
        buffered.flush_delete().unwrap();

        let direct = node.growing_segment(101);
        insert_rows(&direct, &pks, &vec![1; pks.len()]);
        direct.flush_delete().unwrap();
        for chunk in deletes.chunks(batch) {
            let (keys, ts) = split(chunk);
            direct.delete(&keys, &ts).unwrap();
        }

        prop_assert_eq!(buffered.deleted_count(), direct.deleted_count());
        prop_assert_eq!(buffered.real_count(), direct.real_count());
        prop_assert_eq!(
            buffered.flushed_delete_timestamp(),
            direct.flushed_delete_timestamp()
        );
    }

    #[test]
    fn redelivered_batches_are_noops((deletes, batch) in ordered_stream()) {
        let node = TestNode::new();
        let segment = node.growing_segment(102);
        insert_rows(&segment, &(0..40).collect::<Vec<_>>(), &vec![1; 40]);
        segment.flush_delete().unwrap();

        for chunk in deletes.chunks(batch) {
            let (keys, ts) = split(chunk);
            segment.delete(&keys, &ts).unwrap();
        }
        let engine = node.engine(102).unwrap();
        let log = engine.delete_log();
        let watermark = segment.flushed_delete_timestamp();

        for chunk in deletes.chunks(batch) {
            let (keys, ts) = split(chunk);
            segment.delete(&keys, &ts).unwrap();
        }
        prop_assert_eq!(engine.delete_log(), log);
        prop_assert_eq!(segment.flushed_delete_timestamp(), watermark);
    }
}
