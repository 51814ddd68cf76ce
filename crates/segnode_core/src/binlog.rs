//! Binlog descriptors and column layout.
//!
//! A field's data is the concatenation of its binlogs, in order. Each
//! binlog object holds `entries_num` rows:
//!
//! ```text
//! fixed-width types   | row 0 | row 1 | ... |   width bytes per row, configured byte order
//! bool, string types  | encoded BoolArray / StringArray |
//! ```
//!
//! Fixed widths: int8 1, int16 2, int32 4, int64 8, float 4, double 8,
//! float vector `dim * 4`, binary vector `dim / 8`.

use crate::error::{CoreError, CoreResult};
use crate::types::{Endian, FieldId, Timestamp, UniqueId};
use segnode_codec::{BoolArray, CodecError, DataType, FieldPayload, StringArray};
use std::collections::HashMap;
use std::slice::ChunksExact;

/// One binlog object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binlog {
    /// Rows in this object.
    pub entries_num: i64,
    /// Object path in the blob store.
    pub log_path: String,
    /// Object size in bytes.
    pub log_size: i64,
    /// Smallest row timestamp.
    pub timestamp_from: Timestamp,
    /// Largest row timestamp.
    pub timestamp_to: Timestamp,
}

impl Binlog {
    /// Creates a binlog descriptor.
    pub fn new(log_path: impl Into<String>, entries_num: i64, log_size: i64) -> Self {
        Self {
            entries_num,
            log_path: log_path.into(),
            log_size,
            ..Self::default()
        }
    }
}

/// The ordered binlogs of one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldBinlog {
    /// Field the binlogs belong to.
    pub field_id: FieldId,
    /// Binlogs in row order.
    pub binlogs: Vec<Binlog>,
}

impl FieldBinlog {
    /// Creates a field binlog descriptor.
    #[must_use]
    pub fn new(field_id: FieldId, binlogs: Vec<Binlog>) -> Self {
        Self { field_id, binlogs }
    }

    /// Total rows across all binlogs.
    #[must_use]
    pub fn total_rows(&self) -> i64 {
        self.binlogs.iter().map(|b| b.entries_num).sum()
    }

    /// Total bytes across all binlogs.
    #[must_use]
    pub fn total_log_size(&self) -> i64 {
        self.binlogs.iter().map(|b| b.log_size).sum()
    }

    /// Binlog paths in row order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.binlogs.iter().map(|b| b.log_path.clone()).collect()
    }
}

/// Finds the binlog holding segment row `offset`, and the row's offset
/// within it.
///
/// Walks the binlogs in order, subtracting each one's entry count.
/// Returns `None` if `offset` is negative or past the last row.
#[must_use]
pub fn locate_row(field_binlog: &FieldBinlog, offset: i64) -> Option<(&Binlog, i64)> {
    if offset < 0 {
        return None;
    }
    let mut remaining = offset;
    for binlog in &field_binlog.binlogs {
        if remaining < binlog.entries_num {
            return Some((binlog, remaining));
        }
        remaining -= binlog.entries_num;
    }
    None
}

/// Index descriptor of a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIndexInfo {
    /// Indexed field.
    pub field_id: FieldId,
    /// Whether the index is enabled and loaded.
    pub enable_index: bool,
    /// Index name.
    pub index_name: String,
    /// Index id.
    pub index_id: UniqueId,
    /// Build id.
    pub build_id: UniqueId,
    /// Index type, e.g. `IVF_PQ`.
    pub index_type: String,
    /// Build parameters.
    pub index_params: HashMap<String, String>,
    /// Index file paths.
    pub index_file_paths: Vec<String>,
    /// Index size in bytes.
    pub index_size: i64,
    /// Index version.
    pub index_version: i64,
}

/// A field's binlogs and, once loaded, its index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedFieldInfo {
    /// Raw data location.
    pub field_binlog: FieldBinlog,
    /// Index descriptor, if an index has been loaded.
    pub index_info: Option<FieldIndexInfo>,
}

/// Decodes one whole binlog object into a payload.
///
/// `dim` is ignored for scalar types.
///
/// # Errors
///
/// Returns an error if the bytes do not hold whole rows of `data_type`.
pub fn decode_column(
    data_type: DataType,
    dim: usize,
    bytes: &[u8],
    endian: Endian,
) -> CoreResult<FieldPayload> {
    Ok(match data_type {
        DataType::Bool => FieldPayload::Bool(segnode_codec::decode::<BoolArray>(bytes)?.data),
        DataType::String | DataType::VarChar => {
            FieldPayload::String(segnode_codec::decode::<StringArray>(bytes)?.data)
        }
        DataType::Int8 => FieldPayload::Int(
            rows_of(bytes, data_type, dim)?
                .map(|r| i32::from(i8::from_ne_bytes([r[0]])))
                .collect(),
        ),
        DataType::Int16 => FieldPayload::Int(
            rows_of(bytes, data_type, dim)?
                .map(|r| i32::from(endian.read_i16(r)))
                .collect(),
        ),
        DataType::Int32 => FieldPayload::Int(
            rows_of(bytes, data_type, dim)?
                .map(|r| endian.read_i32(r))
                .collect(),
        ),
        DataType::Int64 => FieldPayload::Long(
            rows_of(bytes, data_type, dim)?
                .map(|r| endian.read_i64(r))
                .collect(),
        ),
        DataType::Float => FieldPayload::Float(
            rows_of(bytes, data_type, dim)?
                .map(|r| endian.read_f32(r))
                .collect(),
        ),
        DataType::Double => FieldPayload::Double(
            rows_of(bytes, data_type, dim)?
                .map(|r| endian.read_f64(r))
                .collect(),
        ),
        DataType::FloatVector => {
            rows_of(bytes, data_type, dim)?;
            let mut data = vec![0f32; bytes.len() / 4];
            endian.read_f32_into(bytes, &mut data);
            FieldPayload::FloatVector { dim, data }
        }
        DataType::BinaryVector => {
            rows_of(bytes, data_type, dim)?;
            FieldPayload::BinaryVector {
                dim,
                data: bytes.to_vec(),
            }
        }
    })
}

fn rows_of(bytes: &[u8], data_type: DataType, dim: usize) -> CoreResult<ChunksExact<'_, u8>> {
    let width = match data_type.fixed_width(dim) {
        Some(width) if width > 0 => width,
        _ => {
            return Err(CoreError::invalid_input(format!(
                "{data_type} with dim {dim} has no fixed row width"
            )))
        }
    };
    if bytes.len() % width != 0 {
        return Err(CodecError::schema_mismatch(format!(
            "{} bytes is not a whole number of {data_type} rows of {width} bytes",
            bytes.len()
        ))
        .into());
    }
    Ok(bytes.chunks_exact(width))
}

/// Encodes a payload as one binlog object in the layout [`decode_column`]
/// reads.
///
/// Int payloads are written with the width of `data_type`, truncating.
///
/// # Errors
///
/// Returns an error if the payload cannot carry `data_type`.
pub fn encode_column(
    data_type: DataType,
    payload: &FieldPayload,
    endian: Endian,
) -> CoreResult<Vec<u8>> {
    if !payload.matches(data_type) {
        return Err(CoreError::invalid_input(format!(
            "payload cannot carry {data_type}"
        )));
    }

    let mut out = Vec::new();
    match payload {
        FieldPayload::Bool(v) => {
            return Ok(segnode_codec::encode(&BoolArray { data: v.clone() })?);
        }
        FieldPayload::String(v) => {
            return Ok(segnode_codec::encode(&StringArray { data: v.clone() })?);
        }
        FieldPayload::Int(v) => {
            for &x in v {
                match data_type {
                    DataType::Int8 => out.extend_from_slice(&(x as i8).to_ne_bytes()),
                    DataType::Int16 => out.extend_from_slice(&endian.encode_i16(x as i16)),
                    _ => out.extend_from_slice(&endian.encode_i32(x)),
                }
            }
        }
        FieldPayload::Long(v) => {
            for &x in v {
                out.extend_from_slice(&endian.encode_i64(x));
            }
        }
        FieldPayload::Float(v) | FieldPayload::FloatVector { data: v, .. } => {
            for &x in v {
                out.extend_from_slice(&endian.encode_f32(x));
            }
        }
        FieldPayload::Double(v) => {
            for &x in v {
                out.extend_from_slice(&endian.encode_f64(x));
            }
        }
        FieldPayload::BinaryVector { data, .. } => out.extend_from_slice(data),
    }
    Ok(out)
}
