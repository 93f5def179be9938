//! Vaultio shard - the unit of local storage
//!
//! A shard composes a blob store (payload bytes), a metabase (indexes), and
//! an optional write cache (staging tier), owns a shard-local GC, and
//! exposes per-address operations. Directory layout:
//!
//! ```text
//! <shard>/
//!   blob/           pool/ and tree/ sub-stores
//!   meta/           metabase.db
//!   cache/          cache.db (optional)
//!   metadata.json   shard id, mode, dirty flag
//! ```

mod control;
mod gc;
mod metadata;
mod ops;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;
use vaultio_blobstore::BlobStore;
use vaultio_core::{Error, Result, ShardOptions};
use vaultio_metabase::Metabase;
use vaultio_writecache::WriteCache;

/// Operating mode of a shard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardMode {
    /// Full service.
    #[default]
    ReadWrite,
    /// Reads only; every mutating operation fails with `ReadOnlyMode`.
    ReadOnly,
    /// Metabase distrusted: reads go straight to the blob store, writes fail.
    Degraded,
}

impl fmt::Display for ShardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadWrite => write!(f, "read-write"),
            Self::ReadOnly => write!(f, "read-only"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// The unit of local storage.
pub struct Shard {
    id: Uuid,
    opts: ShardOptions,
    mode: Arc<RwLock<ShardMode>>,
    blobstore: Arc<BlobStore>,
    metabase: Arc<Metabase>,
    writecache: Option<Arc<WriteCache>>,
    gc: Mutex<Option<gc::Gc>>,
    needs_refill: std::sync::atomic::AtomicBool,
}

impl Shard {
    /// Shard identifier, stable across restarts.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Shard configuration.
    #[must_use]
    pub fn options(&self) -> &ShardOptions {
        &self.opts
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> ShardMode {
        *self.mode.read()
    }

    /// Switch the mode. Persisted so a restart keeps it.
    pub fn set_mode(&self, mode: ShardMode) -> Result<()> {
        *self.mode.write() = mode;
        self.store_metadata(true)
    }

    /// Deliver a new-epoch event to the shard GC.
    pub fn notify_epoch(&self, epoch: u64) {
        if let Some(gc) = self.gc.lock().as_ref() {
            gc.notify_epoch(epoch);
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        match self.mode() {
            ShardMode::ReadWrite => Ok(()),
            ShardMode::ReadOnly | ShardMode::Degraded => Err(Error::ReadOnlyMode),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use bytes::Bytes;
    use vaultio_core::{
        Checksum, ContainerId, Object, ObjectHeader, ObjectId, ObjectType, OwnerId,
        WriteCacheOptions,
    };

    pub fn shard_options(dir: &std::path::Path, write_cache: bool) -> ShardOptions {
        let mut opts = ShardOptions::new(dir);
        opts.small_size_limit = 1024;
        if write_cache {
            opts.write_cache = Some(WriteCacheOptions {
                capacity: 1024 * 1024,
                max_object_size: 512,
                flush_interval: std::time::Duration::from_millis(10),
            });
        }
        // long intervals; tests drive GC by hand
        opts.gc_remove_interval = std::time::Duration::from_secs(3600);
        opts.gc_expired_interval = std::time::Duration::from_secs(3600);
        opts
    }

    pub fn new_shard(dir: &std::path::Path, write_cache: bool) -> Shard {
        let shard = Shard::open(shard_options(dir, write_cache)).unwrap();
        shard.init().unwrap();
        shard
    }

    pub fn sample_object_in(container: ContainerId, object_type: ObjectType) -> Object {
        let payload = Bytes::from(vec![0x77; 32]);
        let header = ObjectHeader {
            id: ObjectId::new(rand::random()),
            container,
            owner: OwnerId::new(rand::random()),
            object_type,
            payload_size: payload.len() as u64,
            payload_checksum: Checksum::compute(&payload),
            homomorphic_hash: None,
            creation_epoch: 1,
            attributes: Vec::new(),
            split: None,
            signature: None,
        };
        Object::new(header, payload)
    }

    pub fn sample_object(object_type: ObjectType) -> Object {
        sample_object_in(ContainerId::new(rand::random()), object_type)
    }
}
