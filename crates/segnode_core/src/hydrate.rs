//! Field hydration: filling retrieve output from binlogs.
//!
//! When a vector field's loaded index keeps no raw vectors, the engine
//! returns placeholder rows for it. The hydrator overwrites each row with
//! the value read from the binlog that owns the row's segment offset.
//!
//! Fixed-width types are fetched with one ranged read per row. Bool and
//! string binlogs carry one encoded array per object, so each row costs a
//! whole-object read.

use crate::binlog::{decode_column, locate_row, IndexedFieldInfo};
use crate::dispatch::QueryContext;
use crate::error::{CoreError, CoreResult};
use crate::types::Endian;
use segnode_codec::{BoolArray, DataType, FieldData, FieldPayload, StringArray};
use segnode_storage::BlobStore;
use tracing::debug;

/// Overwrites row `row` of `field` with row `offset` of the binlog at
/// `path`.
///
/// `row` must already exist in the payload.
///
/// # Errors
///
/// Returns [`CoreError::Hydration`] if the read fails, the bytes do not
/// decode as the field's type, or either index is out of range.
pub fn fill_field_data(
    store: &dyn BlobStore,
    path: &str,
    field: &mut FieldData,
    row: usize,
    offset: i64,
    endian: Endian,
) -> CoreResult<()> {
    if row >= field.num_rows() {
        return Err(CoreError::hydration(
            path,
            format!("row {row} out of {} output rows", field.num_rows()),
        ));
    }
    let offset = usize::try_from(offset)
        .map_err(|_| CoreError::hydration(path, format!("negative binlog offset {offset}")))?;

    let value = match field.data_type {
        DataType::Bool => {
            let array: BoolArray = read_array(store, path)?;
            let value = *array.data.get(offset).ok_or_else(|| past_end(path, offset))?;
            FieldPayload::Bool(vec![value])
        }
        DataType::String | DataType::VarChar => {
            let mut array: StringArray = read_array(store, path)?;
            if offset >= array.data.len() {
                return Err(past_end(path, offset));
            }
            FieldPayload::String(vec![array.data.swap_remove(offset)])
        }
        data_type => {
            let dim = payload_dim(&field.payload);
            let width = data_type.fixed_width(dim).filter(|w| *w > 0).ok_or_else(|| {
                CoreError::hydration(path, format!("{data_type} has no row width"))
            })?;
            let bytes = store
                .read_at(path, (offset * width) as u64, width)
                .map_err(|e| CoreError::hydration(path, e.to_string()))?;
            decode_column(data_type, dim, &bytes, endian)
                .map_err(|e| CoreError::hydration(path, e.to_string()))?
        }
    };

    field
        .payload
        .write_rows(row, &value)
        .map_err(|e| CoreError::hydration(path, e.to_string()))
}

fn read_array<T: serde::de::DeserializeOwned>(store: &dyn BlobStore, path: &str) -> CoreResult<T> {
    let bytes = store
        .read(path)
        .map_err(|e| CoreError::hydration(path, e.to_string()))?;
    segnode_codec::decode(&bytes).map_err(|e| CoreError::hydration(path, e.to_string()))
}

fn past_end(path: &str, offset: usize) -> CoreError {
    CoreError::hydration(path, format!("offset {offset} past the end of the array"))
}

fn payload_dim(payload: &FieldPayload) -> usize {
    match payload {
        FieldPayload::FloatVector { dim, .. } | FieldPayload::BinaryVector { dim, .. } => *dim,
        _ => 0,
    }
}

/// Hydrates retrieve output fields from a blob store.
#[derive(Clone, Copy)]
pub struct FieldHydrator<'a> {
    store: &'a dyn BlobStore,
    endian: Endian,
}

impl<'a> FieldHydrator<'a> {
    /// Creates a hydrator reading from `store`.
    #[must_use]
    pub fn new(store: &'a dyn BlobStore, endian: Endian) -> Self {
        Self { store, endian }
    }

    /// Fills every row of `field` from the binlogs in `info`.
    ///
    /// `offsets[i]` is the segment row offset of output row `i`. The
    /// payload is resized to `offsets.len()` rows first. `ctx` is checked
    /// between rows.
    ///
    /// # Errors
    ///
    /// Fails on the first row that cannot be located, read or decoded, or
    /// when `ctx` is cancelled or past its deadline. Rows filled before the
    /// failure are left in place; callers discard the whole result.
    pub fn hydrate_field(
        &self,
        info: &IndexedFieldInfo,
        field: &mut FieldData,
        offsets: &[i64],
        ctx: &QueryContext,
    ) -> CoreResult<()> {
        if field.num_rows() != offsets.len() {
            field.payload.resize_rows(offsets.len());
        }

        for (row, &offset) in offsets.iter().enumerate() {
            ctx.check()?;
            let (binlog, offset_in_binlog) =
                locate_row(&info.field_binlog, offset).ok_or_else(|| {
                    CoreError::hydration(
                        format!("field {}", field.field_id),
                        format!(
                            "offset {offset} beyond {} binlog rows",
                            info.field_binlog.total_rows()
                        ),
                    )
                })?;
            fill_field_data(
                self.store,
                &binlog.log_path,
                field,
                row,
                offset_in_binlog,
                self.endian,
            )?;
        }

        debug!(
            field_id = field.field_id,
            rows = offsets.len(),
            "hydrated field from binlogs"
        );
        Ok(())
    }
}

impl std::fmt::Debug for FieldHydrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldHydrator")
            .field("endian", &self.endian)
            .finish_non_exhaustive()
    }
}
