//! Error taxonomy for record store operations.

use databroker_core::{CodecError, VersionError};

/// Errors returned by [`RecordStore`](crate::storage::RecordStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No record exists for the id (never written, or purged by GC).
    #[error("record not found: {id}")]
    NotFound { id: String },
    /// The backing key-value store failed or could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] anyhow::Error),
    /// The caller's context was cancelled before the operation committed.
    #[error("operation canceled")]
    Canceled,
    /// The caller's deadline passed before the operation committed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A stored blob does not decode into a record envelope.
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: CodecError,
    },
    /// A record could not be encoded for storage.
    #[error("failed to encode record {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: CodecError,
    },
    /// The shared version counter no longer yields a valid token.
    #[error("version allocation failed: {0}")]
    VersionOverflow(#[source] VersionError),
    /// A listing cursor is not a valid version token.
    #[error("invalid version cursor: {0}")]
    InvalidVersion(#[source] VersionError),
    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BrokerError {
    /// Whether this error means the id does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result alias for record store operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
