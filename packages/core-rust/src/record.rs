//! The stored record envelope and its opaque typed payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::version::Version;

/// Opaque typed payload carried by a [`Record`].
///
/// The store never interprets `value`; `type_url` identifies how the
/// collaborator that wrote it should decode it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    /// Identifier of the payload's type, e.g. `type.example.com/session.Session`.
    pub type_url: String,
    /// Serialized payload bytes, stored verbatim.
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

impl TypedData {
    /// Wraps already-serialized bytes.
    #[must_use]
    pub fn new(type_url: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            type_url: type_url.into(),
            value: value.into(),
        }
    }

    /// Serializes `item` to `MsgPack` and tags it with `type_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if `item` cannot be serialized.
    pub fn pack<T: Serialize>(type_url: impl Into<String>, item: &T) -> Result<Self, CodecError> {
        let value = rmp_serde::to_vec_named(item).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Self::new(type_url, value))
    }

    /// Decodes the payload, checking that it carries `type_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TypeMismatch`] if the payload was packed under a
    /// different type url, or [`CodecError::Decode`] if the bytes do not
    /// deserialize into `T`.
    pub fn unpack<T: DeserializeOwned>(&self, type_url: &str) -> Result<T, CodecError> {
        if self.type_url != type_url {
            return Err(CodecError::TypeMismatch {
                expected: type_url.to_string(),
                found: self.type_url.clone(),
            });
        }
        rmp_serde::from_slice(&self.value).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Whether the payload has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// A versioned record: the unit of storage.
///
/// Timestamps are wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Caller-supplied id, unique within the record type's namespace.
    pub id: String,
    /// Opaque payload. Tombstones keep the last live payload.
    pub data: TypedData,
    /// Version assigned by the write that produced this record.
    pub version: Version,
    /// Time of the first write for this id. Preserved across updates.
    pub created_at: u64,
    /// Time of the most recent write, including soft deletes.
    pub modified_at: u64,
    /// Time of the soft delete, or `None` for live records.
    pub deleted_at: Option<u64>,
}

impl Record {
    /// Whether this record is a tombstone awaiting garbage collection.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this tombstone is old enough to be purged at `cutoff`.
    ///
    /// Live records are never purgeable.
    #[must_use]
    pub fn is_purgeable(&self, cutoff: u64) -> bool {
        self.deleted_at.is_some_and(|deleted_at| deleted_at <= cutoff)
    }

    /// Converts this record into a tombstone stamped with `version` at `now`.
    #[must_use]
    pub fn into_tombstone(self, version: Version, now: u64) -> Self {
        Self {
            version,
            modified_at: now,
            deleted_at: Some(now),
            ..self
        }
    }
}
