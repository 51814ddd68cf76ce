//! Collection schema description.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a collection field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean.
    Bool,
    /// 8-bit signed integer, widened to `i32` in payloads.
    Int8,
    /// 16-bit signed integer, widened to `i32` in payloads.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Unbounded UTF-8 string.
    String,
    /// Length-limited UTF-8 string.
    VarChar,
    /// Bit-packed binary vector; `dim` is in bits.
    BinaryVector,
    /// Dense float vector.
    FloatVector,
}

impl DataType {
    /// Returns true for vector element types.
    #[must_use]
    pub const fn is_vector(self) -> bool {
        matches!(self, Self::BinaryVector | Self::FloatVector)
    }

    /// Returns true for types that can serve as a primary key.
    #[must_use]
    pub const fn is_primary_key_type(self) -> bool {
        matches!(self, Self::Int64 | Self::VarChar)
    }

    /// Width in bytes of one row as stored in a binlog.
    ///
    /// Returns `None` for variable-width types (bool, strings), which are
    /// stored as one encoded array per binlog object. For vectors the width
    /// depends on `dim`.
    #[must_use]
    pub const fn fixed_width(self, dim: usize) -> Option<usize> {
        match self {
            Self::Int8 => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 | Self::Float => Some(4),
            Self::Int64 | Self::Double => Some(8),
            Self::FloatVector => Some(dim * 4),
            Self::BinaryVector => Some(dim / 8),
            Self::Bool | Self::String | Self::VarChar => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "Bool",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::String => "String",
            Self::VarChar => "VarChar",
            Self::BinaryVector => "BinaryVector",
            Self::FloatVector => "FloatVector",
        };
        f.write_str(name)
    }
}

/// Schema of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field identifier, unique within the collection.
    pub field_id: i64,
    /// Human-readable field name.
    pub name: String,
    /// Element type.
    pub data_type: DataType,
    /// Whether this field is the collection's primary key.
    pub is_primary_key: bool,
    /// Vector dimension. Zero for scalar fields.
    pub dim: usize,
}

impl FieldSchema {
    /// Creates a scalar field schema.
    pub fn scalar(field_id: i64, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            field_id,
            name: name.into(),
            data_type,
            is_primary_key: false,
            dim: 0,
        }
    }

    /// Creates a vector field schema.
    pub fn vector(field_id: i64, name: impl Into<String>, data_type: DataType, dim: usize) -> Self {
        Self {
            field_id,
            name: name.into(),
            data_type,
            is_primary_key: false,
            dim,
        }
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Bytes per row in a fixed-width binlog, if the type is fixed-width.
    #[must_use]
    pub fn row_width(&self) -> Option<usize> {
        self.data_type.fixed_width(self.dim)
    }
}

/// Schema of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Creates a schema from its fields.
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Returns the primary key field, if one is declared.
    #[must_use]
    pub fn primary_key(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary_key)
    }

    /// Looks up a field by id.
    #[must_use]
    pub fn field(&self, field_id: i64) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }
}
