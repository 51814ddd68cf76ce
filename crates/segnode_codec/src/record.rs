//! Request and response blobs crossing the engine boundary.

use crate::error::{CodecError, CodecResult};
use crate::field::FieldData;
use crate::ids::IdSet;
use serde::{Deserialize, Serialize};

/// A batch of rows to insert, in columnar form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRecord {
    /// Number of rows in the batch.
    pub num_rows: i64,
    /// One entry per field.
    pub fields_data: Vec<FieldData>,
}

impl InsertRecord {
    /// Checks every field holds exactly `num_rows` well-formed rows.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaMismatch`] on the first bad field.
    pub fn validate(&self) -> CodecResult<()> {
        for field in &self.fields_data {
            field.validate()?;
            if field.num_rows() as i64 != self.num_rows {
                return Err(CodecError::schema_mismatch(format!(
                    "field {} has {} rows, record declares {}",
                    field.field_id,
                    field.num_rows(),
                    self.num_rows
                )));
            }
        }
        Ok(())
    }
}

/// Rows returned by a retrieve, aligned by position.
///
/// Row `i` has primary key `ids[i]`, segment offset `offsets[i]`, and its
/// field values at row `i` of each entry in `fields_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveResults {
    /// Primary keys.
    pub ids: IdSet,
    /// Segment-local row offsets.
    pub offsets: Vec<i64>,
    /// Output fields.
    pub fields_data: Vec<FieldData>,
}

impl RetrieveResults {
    /// An empty result with int64 keys.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ids: IdSet::Int(Vec::new()),
            offsets: Vec::new(),
            fields_data: Vec::new(),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Reorders all rows so primary keys ascend.
    ///
    /// Offsets and every field's values move with their key. Equal keys
    /// keep their relative order.
    ///
    /// # Errors
    ///
    /// Returns an error if offsets or any field disagree with the key count.
    pub fn sort_by_pk(&mut self) -> CodecResult<()> {
        let rows = self.ids.len();
        if self.offsets.len() != rows {
            return Err(CodecError::schema_mismatch(format!(
                "{} offsets for {rows} ids",
                self.offsets.len()
            )));
        }

        let order = self.ids.sort_order();
        if order.iter().enumerate().all(|(i, &j)| i == j) {
            return Ok(());
        }

        for field in &mut self.fields_data {
            field.payload.reorder(&order)?;
        }
        self.ids.reorder(&order)?;
        self.offsets = order.iter().map(|&i| self.offsets[i]).collect();
        Ok(())
    }
}

/// Whole-object payload for a bool binlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolArray {
    /// Values in row order.
    pub data: Vec<bool>,
}

/// Whole-object payload for a string or varchar binlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringArray {
    /// Values in row order.
    pub data: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldPayload;
    use crate::schema::DataType;

    fn unsorted() -> RetrieveResults {
        RetrieveResults {
            ids: IdSet::Int(vec![30, 10, 20]),
            offsets: vec![2, 0, 1],
            fields_data: vec![
                FieldData::new(
                    101,
                    DataType::VarChar,
                    FieldPayload::String(vec!["c".into(), "a".into(), "b".into()]),
                ),
                FieldData::new(
                    102,
                    DataType::FloatVector,
                    FieldPayload::FloatVector {
                        dim: 2,
                        data: vec![3.0, 3.5, 1.0, 1.5, 2.0, 2.5],
                    },
                ),
            ],
        }
    }

    #[test]
    fn sort_by_pk_moves_rows_together() {
        let mut results = unsorted();
        results.sort_by_pk().unwrap();

        assert_eq!(results.ids, IdSet::Int(vec![10, 20, 30]));
        assert_eq!(results.offsets, vec![0, 1, 2]);
        assert_eq!(
            results.fields_data[0].payload,
            FieldPayload::String(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(
            results.fields_data[1].payload,
            FieldPayload::FloatVector {
                dim: 2,
                data: vec![1.0, 1.5, 2.0, 2.5, 3.0, 3.5]
            }
        );
    }

    #[test]
    fn sort_by_pk_rejects_misaligned_offsets() {
        let mut results = unsorted();
        results.offsets.pop();
        assert!(results.sort_by_pk().is_err());
    }

    #[test]
    fn sort_by_pk_empty() {
        let mut results = RetrieveResults::empty();
        results.sort_by_pk().unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn insert_record_validation() {
        let record = InsertRecord {
            num_rows: 2,
            fields_data: vec![FieldData::new(
                100,
                DataType::Int64,
                FieldPayload::Long(vec![1, 2]),
            )],
        };
        assert!(record.validate().is_ok());

        let short = InsertRecord {
            num_rows: 3,
            ..record
        };
        assert!(short.validate().is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sorted_keys_keep_their_offsets(keys in prop::collection::vec(-50i64..50, 0..40)) {
                let offsets: Vec<i64> = (0..keys.len() as i64).collect();
                let mut results = RetrieveResults {
                    ids: IdSet::Int(keys.clone()),
                    offsets,
                    fields_data: vec![FieldData::new(
                        100,
                        DataType::Int64,
                        FieldPayload::Long(keys.clone()),
                    )],
                };
                results.sort_by_pk().unwrap();

                let IdSet::Int(sorted) = &results.ids else {
                    panic!("key type changed");
                };
                prop_assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
                for (key, offset) in sorted.iter().zip(&results.offsets) {
                    prop_assert_eq!(*key, keys[*offset as usize]);
                }
                prop_assert_eq!(
                    &results.fields_data[0].payload,
                    &FieldPayload::Long(sorted.clone())
                );
            }
        }
    }
}
