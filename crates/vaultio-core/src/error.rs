//! Error types shared by every storage tier.

use crate::object::SplitInfo;
use thiserror::Error;

/// Common result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Address unknown to the queried store.
    #[error("object not found")]
    NotFound,

    /// Address is present in the graveyard.
    #[error("object already removed")]
    AlreadyRemoved,

    /// Target of an inhume has an unexpired locker.
    #[error("object is locked")]
    ObjectLocked,

    /// Raw request addressed a virtual (split) object.
    #[error("object is split: {0}")]
    Split(SplitInfo),

    /// Requested byte range exceeds the payload.
    #[error("requested range is out of payload bounds")]
    OutOfRange,

    /// Shard mode forbids the mutation.
    #[error("shard is in read-only mode")]
    ReadOnlyMode,

    /// Write cache refused admission; caller should bypass to the blob store.
    #[error("write cache is full")]
    WriteCacheFull,

    /// Store cannot accept the payload for lack of space.
    #[error("insufficient disk space")]
    InsufficientSpace,

    /// Operation crossed its deadline.
    #[error("operation cancelled by deadline")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Persisted record failed to decode.
    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a corrupted-record error.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if this is a missing-object error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Check if this is an already-removed error.
    #[must_use]
    pub fn is_already_removed(&self) -> bool {
        matches!(self, Self::AlreadyRemoved)
    }

    /// Check if the error indicates a store-level failure worth counting
    /// against the shard, as opposed to a per-object outcome.
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Database(_) | Self::InsufficientSpace | Self::Corrupted(_)
        )
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Self::Database(e.to_string())
    }
}
