//! Core type definitions for segnode.

use crate::error::{CoreError, CoreResult};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use segnode_codec::{DataType, IdSet};
use std::fmt;

/// Cluster-wide identifier for segments, partitions and collections.
pub type UniqueId = i64;

/// Hybrid logical timestamp.
pub type Timestamp = u64;

/// Field identifier within a collection schema.
pub type FieldId = i64;

/// A primary key value.
///
/// Keys order first by variant, then by value, so a sort over a mixed
/// list is still total.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimaryKey {
    /// Int64 primary key.
    Int64(i64),
    /// VarChar primary key.
    VarChar(String),
}

impl PrimaryKey {
    /// Schema type of this key.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Int64(_) => DataType::Int64,
            Self::VarChar(_) => DataType::VarChar,
        }
    }

    /// Returns true if this key and `other` have the same variant.
    #[must_use]
    pub fn same_type(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        Self::VarChar(value.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        Self::VarChar(value)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::VarChar(v) => write!(f, "{v:?}"),
        }
    }
}

/// Packs keys into the engine's key-set wire form.
///
/// The variant is taken from the first key; every key must share it.
///
/// # Errors
///
/// Returns [`CoreError::InvalidInput`] if the keys mix types.
pub fn id_set_from_keys(keys: &[PrimaryKey]) -> CoreResult<IdSet> {
    match keys.first() {
        None | Some(PrimaryKey::Int64(_)) => {
            let mut ids = Vec::with_capacity(keys.len());
            for key in keys {
                match key {
                    PrimaryKey::Int64(v) => ids.push(*v),
                    PrimaryKey::VarChar(_) => return Err(mixed_keys()),
                }
            }
            Ok(IdSet::Int(ids))
        }
        Some(PrimaryKey::VarChar(_)) => {
            let mut ids = Vec::with_capacity(keys.len());
            for key in keys {
                match key {
                    PrimaryKey::VarChar(v) => ids.push(v.clone()),
                    PrimaryKey::Int64(_) => return Err(mixed_keys()),
                }
            }
            Ok(IdSet::Str(ids))
        }
    }
}

/// Unpacks a key-set into individual keys.
#[must_use]
pub fn keys_from_id_set(ids: &IdSet) -> Vec<PrimaryKey> {
    match ids {
        IdSet::Int(v) => v.iter().copied().map(PrimaryKey::Int64).collect(),
        IdSet::Str(v) => v.iter().cloned().map(PrimaryKey::VarChar).collect(),
    }
}

fn mixed_keys() -> CoreError {
    CoreError::invalid_input("primary keys in one batch must share a type")
}

/// Kind of segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentType {
    /// Mutable, accepts streaming inserts.
    Growing,
    /// Immutable, bulk-loaded from binlogs and indexes.
    Sealed,
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Growing => f.write_str("Growing"),
            Self::Sealed => f.write_str("Sealed"),
        }
    }
}

/// Opaque resume token for upstream replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgPosition {
    /// Channel the position belongs to.
    pub channel_name: String,
    /// Broker-specific message id.
    pub msg_id: Vec<u8>,
    /// Consumer group.
    pub msg_group: String,
    /// Timestamp at the position.
    pub timestamp: Timestamp,
}

/// Byte order used for bloom key encoding and binlog decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endian {
    /// Little-endian.
    #[default]
    Little,
    /// Big-endian.
    Big,
}

macro_rules! endian_read {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Reads a `", stringify!($ty), "` from the front of `buf`.")]
        ///
        /// # Panics
        ///
        /// Panics if `buf` is shorter than the value.
        #[must_use]
        pub fn $name(self, buf: &[u8]) -> $ty {
            match self {
                Self::Little => LittleEndian::$name(buf),
                Self::Big => BigEndian::$name(buf),
            }
        }
    };
}

macro_rules! endian_encode {
    ($name:ident, $write:ident, $ty:ty, $len:expr) => {
        #[doc = concat!("Encodes an `", stringify!($ty), "` in this byte order.")]
        #[must_use]
        pub fn $name(self, value: $ty) -> [u8; $len] {
            let mut buf = [0u8; $len];
            match self {
                Self::Little => LittleEndian::$write(&mut buf, value),
                Self::Big => BigEndian::$write(&mut buf, value),
            }
            buf
        }
    };
}

impl Endian {
    endian_read!(read_i16, i16);
    endian_read!(read_i32, i32);
    endian_read!(read_i64, i64);
    endian_read!(read_f32, f32);
    endian_read!(read_f64, f64);

    endian_encode!(encode_i16, write_i16, i16, 2);
    endian_encode!(encode_i32, write_i32, i32, 4);
    endian_encode!(encode_i64, write_i64, i64, 8);
    endian_encode!(encode_f32, write_f32, f32, 4);
    endian_encode!(encode_f64, write_f64, f64, 8);

    /// Decodes `dst.len()` floats from `src`.
    ///
    /// # Panics
    ///
    /// Panics if `src.len() != dst.len() * 4`.
    pub fn read_f32_into(self, src: &[u8], dst: &mut [f32]) {
        match self {
            Self::Little => LittleEndian::read_f32_into(src, dst),
            Self::Big => BigEndian::read_f32_into(src, dst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_ordering() {
        let mut keys = vec![
            PrimaryKey::Int64(3),
            PrimaryKey::VarChar("a".into()),
            PrimaryKey::Int64(-1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                PrimaryKey::Int64(-1),
                PrimaryKey::Int64(3),
                PrimaryKey::VarChar("a".into())
            ]
        );
    }

    #[test]
    fn id_set_round_trip() {
        let keys: Vec<PrimaryKey> = vec!["a".into(), "b".into()];
        let ids = id_set_from_keys(&keys).unwrap();
        assert_eq!(ids, IdSet::Str(vec!["a".into(), "b".into()]));
        assert_eq!(keys_from_id_set(&ids), keys);
    }

    #[test]
    fn id_set_rejects_mixed() {
        let keys = vec![PrimaryKey::Int64(1), PrimaryKey::from("x")];
        let err = id_set_from_keys(&keys).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
    }

    #[test]
    fn empty_keys_are_int() {
        assert_eq!(id_set_from_keys(&[]).unwrap(), IdSet::Int(vec![]));
    }

    #[test]
    fn endian_encoding() {
        assert_eq!(Endian::Little.encode_i64(1), [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Endian::Big.encode_i64(1), [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(Endian::Big.encode_i16(0x0102), [1, 2]);
        assert_eq!(Endian::Little.encode_i32(0x0102_0304), [4, 3, 2, 1]);
        assert_eq!(Endian::Big.read_f32(&Endian::Big.encode_f32(1.5)), 1.5);
        assert_eq!(Endian::Little.read_f64(&Endian::Little.encode_f64(-2.25)), -2.25);
        assert_eq!(Endian::Big.read_i32(&[0, 0, 1, 0]), 256);
        assert_eq!(Endian::Little.read_i16(&[1, 1]), 257);
    }

    #[test]
    fn endian_float_decoding() {
        let mut buf = Vec::new();
        for v in [1.5f32, -2.0] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        let mut out = [0f32; 2];
        Endian::Big.read_f32_into(&buf, &mut out);
        assert_eq!(out, [1.5, -2.0]);
    }

    #[test]
    fn segment_type_display() {
        assert_eq!(SegmentType::Growing.to_string(), "Growing");
        assert_eq!(SegmentType::Sealed.to_string(), "Sealed");
    }
}
