//! Vaultio blob store - payload persistence tier
//!
//! Objects are persisted as opaque checksummed frames in one of two
//! sub-stores:
//! - a bucketed **pool** of small key/value databases for payloads up to the
//!   configured size limit
//! - a hashed-path **file tree** for everything larger
//!
//! Every write returns a [`BlobRef`] identifying the sub-store that took the
//! object; the metabase records it for O(1) retrieval. The blob store is the
//! ground truth: the metabase can be rebuilt by [`BlobStore::iterate`].

mod pool;
mod store;
mod tree;

pub use store::{BlobRef, BlobStore, BlobStoreConfig};
