//! # segnode codec
//!
//! Wire types exchanged with the native segment engine, and their CBOR
//! encoding.
//!
//! The engine boundary speaks in blobs: insert batches, primary-key sets
//! for deletes, and retrieve results all cross it as encoded bytes. Binlog
//! objects holding variable-width columns (bool, string) are stored as one
//! encoded array per object. This crate owns those shapes:
//!
//! - [`DataType`], [`FieldSchema`], [`CollectionSchema`] - schema description
//! - [`FieldData`], [`FieldPayload`] - columnar field values
//! - [`IdSet`] - primary keys, int64 or string
//! - [`InsertRecord`], [`RetrieveResults`] - engine request/response blobs
//! - [`BoolArray`], [`StringArray`] - whole-object binlog payloads
//!
//! ## Usage
//!
//! ```
//! use segnode_codec::{decode, encode, IdSet};
//!
//! let ids = IdSet::Int(vec![1, 2, 3]);
//! let bytes = encode(&ids).unwrap();
//! let decoded: IdSet = decode(&bytes).unwrap();
//! assert_eq!(ids, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod field;
mod ids;
mod record;
mod schema;

pub use error::{CodecError, CodecResult};
pub use field::{FieldData, FieldPayload};
pub use ids::IdSet;
pub use record::{BoolArray, InsertRecord, RetrieveResults, StringArray};
pub use schema::{CollectionSchema, DataType, FieldSchema};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a wire value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|err| CodecError::encoding_failed(err.to_string()))?;
    Ok(buf)
}

/// Decodes a wire value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are empty, truncated, or do not describe
/// a `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    if bytes.is_empty() {
        return Err(CodecError::UnexpectedEof);
    }
    ciborium::from_reader(bytes).map_err(|err| CodecError::decoding_failed(err.to_string()))
}
