//! `MsgPack` encoding of the [`Record`] envelope.
//!
//! Records are stored as named-field `MsgPack` maps so that fields can be
//! added later without breaking blobs written by older processes.

use crate::record::Record;

/// Errors from encoding or decoding stored blobs and typed payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
    /// The bytes do not decode into the expected shape.
    #[error("decode failed: {0}")]
    Decode(String),
    /// A typed payload was unpacked as the wrong type.
    #[error("payload type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
}

/// Encodes a record envelope for storage.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_record(record: &Record) -> Result<Vec<u8>, CodecError> {
    rmp_serde::to_vec_named(record).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a stored blob back into a record envelope.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if `bytes` is not a valid envelope.
pub fn decode_record(bytes: &[u8]) -> Result<Record, CodecError> {
    rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
