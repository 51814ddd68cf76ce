//! Columnar field values.

use crate::error::{CodecError, CodecResult};
use crate::schema::DataType;
use serde::{Deserialize, Serialize};

/// The values of one field across a batch of rows.
///
/// Int8 and Int16 fields are widened into [`FieldPayload::Int`]; VarChar
/// and String share [`FieldPayload::String`]. Vector payloads are flat,
/// row-major buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldPayload {
    /// Bool values.
    Bool(Vec<bool>),
    /// Int8, Int16 and Int32 values.
    Int(Vec<i32>),
    /// Int64 values.
    Long(Vec<i64>),
    /// Float values.
    Float(Vec<f32>),
    /// Double values.
    Double(Vec<f64>),
    /// String and VarChar values.
    String(Vec<String>),
    /// Dense float vectors, `dim` floats per row.
    FloatVector {
        /// Floats per row.
        dim: usize,
        /// Row-major values.
        data: Vec<f32>,
    },
    /// Binary vectors, `dim` bits (`dim / 8` bytes) per row.
    BinaryVector {
        /// Bits per row.
        dim: usize,
        /// Row-major packed bytes.
        data: Vec<u8>,
    },
}

impl FieldPayload {
    /// Creates an empty payload suitable for `data_type`.
    #[must_use]
    pub fn empty(data_type: DataType, dim: usize) -> Self {
        match data_type {
            DataType::Bool => Self::Bool(Vec::new()),
            DataType::Int8 | DataType::Int16 | DataType::Int32 => Self::Int(Vec::new()),
            DataType::Int64 => Self::Long(Vec::new()),
            DataType::Float => Self::Float(Vec::new()),
            DataType::Double => Self::Double(Vec::new()),
            DataType::String | DataType::VarChar => Self::String(Vec::new()),
            DataType::FloatVector => Self::FloatVector {
                dim,
                data: Vec::new(),
            },
            DataType::BinaryVector => Self::BinaryVector {
                dim,
                data: Vec::new(),
            },
        }
    }

    /// Returns true if this payload variant can carry `data_type`.
    #[must_use]
    pub fn matches(&self, data_type: DataType) -> bool {
        matches!(
            (self, data_type),
            (Self::Bool(_), DataType::Bool)
                | (
                    Self::Int(_),
                    DataType::Int8 | DataType::Int16 | DataType::Int32
                )
                | (Self::Long(_), DataType::Int64)
                | (Self::Float(_), DataType::Float)
                | (Self::Double(_), DataType::Double)
                | (Self::String(_), DataType::String | DataType::VarChar)
                | (Self::FloatVector { .. }, DataType::FloatVector)
                | (Self::BinaryVector { .. }, DataType::BinaryVector)
        )
    }

    /// Number of rows held.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::String(v) => v.len(),
            Self::FloatVector { dim, data } => data.len().checked_div(*dim).unwrap_or(0),
            Self::BinaryVector { dim, data } => data.len().checked_div(*dim / 8).unwrap_or(0),
        }
    }

    /// Resizes to exactly `rows` rows, zero-filling new rows.
    pub fn resize_rows(&mut self, rows: usize) {
        match self {
            Self::Bool(v) => v.resize(rows, false),
            Self::Int(v) => v.resize(rows, 0),
            Self::Long(v) => v.resize(rows, 0),
            Self::Float(v) => v.resize(rows, 0.0),
            Self::Double(v) => v.resize(rows, 0.0),
            Self::String(v) => v.resize(rows, String::new()),
            Self::FloatVector { dim, data } => data.resize(rows * *dim, 0.0),
            Self::BinaryVector { dim, data } => data.resize(rows * (*dim / 8), 0),
        }
    }

    /// Rearranges rows so that new row `i` is old row `order[i]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `order` has a different length than the payload
    /// or names a row that does not exist.
    pub fn reorder(&mut self, order: &[usize]) -> CodecResult<()> {
        let rows = self.num_rows();
        if order.len() != rows {
            return Err(CodecError::schema_mismatch(format!(
                "reorder of {rows} rows given {} indices",
                order.len()
            )));
        }
        *self = self.take_rows(order)?;
        Ok(())
    }

    /// Returns a new payload holding rows `rows`, in that order.
    ///
    /// Rows may repeat.
    ///
    /// # Errors
    ///
    /// Returns an error if a row index is out of range.
    pub fn take_rows(&self, rows: &[usize]) -> CodecResult<Self> {
        let len = self.num_rows();
        if let Some(bad) = rows.iter().find(|&&i| i >= len) {
            return Err(CodecError::schema_mismatch(format!(
                "row {bad} out of {len} rows"
            )));
        }

        Ok(match self {
            Self::Bool(v) => Self::Bool(gather(v, rows, 1)),
            Self::Int(v) => Self::Int(gather(v, rows, 1)),
            Self::Long(v) => Self::Long(gather(v, rows, 1)),
            Self::Float(v) => Self::Float(gather(v, rows, 1)),
            Self::Double(v) => Self::Double(gather(v, rows, 1)),
            Self::String(v) => Self::String(gather(v, rows, 1)),
            Self::FloatVector { dim, data } => Self::FloatVector {
                dim: *dim,
                data: gather(data, rows, *dim),
            },
            Self::BinaryVector { dim, data } => Self::BinaryVector {
                dim: *dim,
                data: gather(data, rows, *dim / 8),
            },
        })
    }

    /// Overwrites rows starting at `at` with the rows of `src`, growing
    /// this payload as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if `src` is a different variant or vector dim.
    pub fn write_rows(&mut self, at: usize, src: &Self) -> CodecResult<()> {
        if !self.same_shape(src) {
            return Err(CodecError::schema_mismatch(
                "cannot write rows of a different type or dim",
            ));
        }
        let end = at + src.num_rows();
        if self.num_rows() < end {
            self.resize_rows(end);
        }

        match (self, src) {
            (Self::Bool(dst), Self::Bool(src)) => scatter(dst, src, at, 1),
            (Self::Int(dst), Self::Int(src)) => scatter(dst, src, at, 1),
            (Self::Long(dst), Self::Long(src)) => scatter(dst, src, at, 1),
            (Self::Float(dst), Self::Float(src)) => scatter(dst, src, at, 1),
            (Self::Double(dst), Self::Double(src)) => scatter(dst, src, at, 1),
            (Self::String(dst), Self::String(src)) => scatter(dst, src, at, 1),
            (
                Self::FloatVector { dim, data },
                Self::FloatVector {
                    dim: src_dim,
                    data: src,
                },
            ) if *dim == *src_dim => scatter(data, src, at, *dim),
            (
                Self::BinaryVector { dim, data },
                Self::BinaryVector {
                    dim: src_dim,
                    data: src,
                },
            ) if *dim == *src_dim => scatter(data, src, at, *dim / 8),
            _ => {
                return Err(CodecError::schema_mismatch(
                    "cannot write rows of a different type or dim",
                ))
            }
        }
        Ok(())
    }

    fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::FloatVector { dim: a, .. }, Self::FloatVector { dim: b, .. })
            | (Self::BinaryVector { dim: a, .. }, Self::BinaryVector { dim: b, .. }) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

fn scatter<T: Clone>(dst: &mut [T], src: &[T], at: usize, width: usize) {
    dst[at * width..at * width + src.len()].clone_from_slice(src);
}

fn gather<T: Clone>(values: &[T], order: &[usize], width: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for &row in order {
        out.extend_from_slice(&values[row * width..(row + 1) * width]);
    }
    out
}

/// One field's values, tagged with its id and declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldData {
    /// Field identifier.
    pub field_id: i64,
    /// Declared element type.
    pub data_type: DataType,
    /// The values.
    pub payload: FieldPayload,
}

impl FieldData {
    /// Creates field data from its parts.
    #[must_use]
    pub const fn new(field_id: i64, data_type: DataType, payload: FieldPayload) -> Self {
        Self {
            field_id,
            data_type,
            payload,
        }
    }

    /// Number of rows held.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.payload.num_rows()
    }

    /// Checks that the payload variant agrees with the declared type and
    /// that vector buffers hold whole rows.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaMismatch`] describing the first problem.
    pub fn validate(&self) -> CodecResult<()> {
        if !self.payload.matches(self.data_type) {
            return Err(CodecError::schema_mismatch(format!(
                "field {} declared {} but carries a different payload",
                self.field_id, self.data_type
            )));
        }
        match &self.payload {
            FieldPayload::FloatVector { dim, data } if *dim == 0 || data.len() % dim != 0 => {
                Err(CodecError::schema_mismatch(format!(
                    "field {}: {} floats is not a multiple of dim {dim}",
                    self.field_id,
                    data.len()
                )))
            }
            FieldPayload::BinaryVector { dim, data }
                if *dim == 0 || dim % 8 != 0 || data.len() % (dim / 8) != 0 =>
            {
                Err(CodecError::schema_mismatch(format!(
                    "field {}: {} bytes does not fit binary dim {dim}",
                    self.field_id,
                    data.len()
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_row_counts() {
        let f = FieldPayload::FloatVector {
            dim: 4,
            data: vec![0.0; 12],
        };
        assert_eq!(f.num_rows(), 3);

        let b = FieldPayload::BinaryVector {
            dim: 16,
            data: vec![0; 10],
        };
        assert_eq!(b.num_rows(), 5);
    }

    #[test]
    fn zero_dim_has_no_rows() {
        let f = FieldPayload::FloatVector {
            dim: 0,
            data: vec![],
        };
        assert_eq!(f.num_rows(), 0);
    }

    #[test]
    fn resize_zero_fills() {
        let mut p = FieldPayload::empty(DataType::FloatVector, 3);
        p.resize_rows(2);
        assert_eq!(
            p,
            FieldPayload::FloatVector {
                dim: 3,
                data: vec![0.0; 6]
            }
        );

        let mut s = FieldPayload::empty(DataType::VarChar, 0);
        s.resize_rows(2);
        assert_eq!(s, FieldPayload::String(vec![String::new(), String::new()]));
    }

    #[test]
    fn reorder_scalars() {
        let mut p = FieldPayload::Long(vec![10, 20, 30]);
        p.reorder(&[2, 0, 1]).unwrap();
        assert_eq!(p, FieldPayload::Long(vec![30, 10, 20]));
    }

    #[test]
    fn reorder_vectors_moves_whole_rows() {
        let mut p = FieldPayload::FloatVector {
            dim: 2,
            data: vec![1.0, 1.5, 2.0, 2.5],
        };
        p.reorder(&[1, 0]).unwrap();
        assert_eq!(
            p,
            FieldPayload::FloatVector {
                dim: 2,
                data: vec![2.0, 2.5, 1.0, 1.5]
            }
        );

        let mut b = FieldPayload::BinaryVector {
            dim: 16,
            data: vec![1, 2, 3, 4],
        };
        b.reorder(&[1, 0]).unwrap();
        assert_eq!(
            b,
            FieldPayload::BinaryVector {
                dim: 16,
                data: vec![3, 4, 1, 2]
            }
        );
    }

    #[test]
    fn reorder_rejects_bad_order() {
        let mut p = FieldPayload::Int(vec![1, 2]);
        assert!(p.reorder(&[0]).is_err());
        assert!(p.reorder(&[0, 5]).is_err());
        assert_eq!(p, FieldPayload::Int(vec![1, 2]));
    }

    #[test]
    fn take_rows_may_repeat() {
        let p = FieldPayload::String(vec!["a".into(), "b".into()]);
        let taken = p.take_rows(&[1, 1, 0]).unwrap();
        assert_eq!(
            taken,
            FieldPayload::String(vec!["b".into(), "b".into(), "a".into()])
        );
        assert!(p.take_rows(&[2]).is_err());
    }

    #[test]
    fn write_rows_grows_and_overwrites() {
        let mut p = FieldPayload::FloatVector {
            dim: 2,
            data: vec![1.0, 1.0],
        };
        let src = FieldPayload::FloatVector {
            dim: 2,
            data: vec![3.0, 3.5],
        };
        p.write_rows(2, &src).unwrap();
        assert_eq!(
            p,
            FieldPayload::FloatVector {
                dim: 2,
                data: vec![1.0, 1.0, 0.0, 0.0, 3.0, 3.5]
            }
        );

        p.write_rows(0, &src).unwrap();
        assert_eq!(p.num_rows(), 3);

        let wrong_dim = FieldPayload::FloatVector {
            dim: 3,
            data: vec![0.0; 3],
        };
        assert!(p.write_rows(0, &wrong_dim).is_err());
        assert!(p.write_rows(0, &FieldPayload::Long(vec![1])).is_err());
    }

    #[test]
    fn payload_matches_widened_ints() {
        let p = FieldPayload::Int(vec![]);
        assert!(p.matches(DataType::Int8));
        assert!(p.matches(DataType::Int16));
        assert!(p.matches(DataType::Int32));
        assert!(!p.matches(DataType::Int64));
    }

    #[test]
    fn validate_detects_mismatch() {
        let bad = FieldData::new(1, DataType::Int64, FieldPayload::Bool(vec![true]));
        assert!(bad.validate().is_err());

        let ragged = FieldData::new(
            2,
            DataType::FloatVector,
            FieldPayload::FloatVector {
                dim: 4,
                data: vec![0.0; 5],
            },
        );
        assert!(ragged.validate().is_err());

        let odd_bits = FieldData::new(
            3,
            DataType::BinaryVector,
            FieldPayload::BinaryVector {
                dim: 12,
                data: vec![0; 3],
            },
        );
        assert!(odd_bits.validate().is_err());

        let ok = FieldData::new(4, DataType::VarChar, FieldPayload::String(vec!["x".into()]));
        assert!(ok.validate().is_ok());
    }
}
