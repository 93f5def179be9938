//! Vaultio core - shared types for the local object storage engine
//!
//! This crate defines the data model every storage tier speaks:
//! - content-addressed identifiers and addresses
//! - the object model (header + payload) and its on-disk frame
//! - tombstone and lock payloads
//! - the common error type and operation deadlines

pub mod config;
pub mod deadline;
pub mod error;
pub mod object;
pub mod types;

// Re-exports
pub use config::{ShardOptions, WriteCacheOptions};
pub use deadline::Deadline;
pub use error::{Error, Result};
pub use object::{
    Checksum, LockList, Object, ObjectHeader, SplitHeader, SplitInfo, Tombstone, FRAME_MAGIC,
};
pub use types::{
    Address, Attribute, ContainerId, ObjectId, ObjectType, OwnerId, ParseIdError,
    ATTR_EXPIRATION_EPOCH, ATTR_FILE_NAME, ATTR_TIMESTAMP,
};
