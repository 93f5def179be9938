//! Shard lifecycle: open, init, refill, close.

use crate::gc::Gc;
use crate::metadata::ShardMetadata;
use crate::{Shard, ShardMode};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use vaultio_blobstore::{BlobStore, BlobStoreConfig};
use vaultio_core::{Address, Error, ObjectType, Result, ShardOptions, Tombstone};
use vaultio_metabase::Metabase;
use vaultio_writecache::WriteCache;

impl Shard {
    /// Open every component of the shard.
    ///
    /// The dirty flag is raised while the shard is open; finding it already
    /// raised means the previous run crashed and the metabase is rebuilt
    /// during [`Shard::init`].
    pub fn open(opts: ShardOptions) -> Result<Self> {
        std::fs::create_dir_all(&opts.path)?;

        let mut meta = ShardMetadata::load_or_create(&opts.path, opts.read_only)?;
        let was_dirty = meta.dirty;
        meta.dirty = true;
        if opts.read_only {
            meta.mode = ShardMode::ReadOnly;
        }
        meta.store(&opts.path)?;

        let blobstore = Arc::new(BlobStore::open(&BlobStoreConfig {
            dir: opts.path.join("blob"),
            small_size_limit: opts.small_size_limit,
            depth: opts.blob_depth,
            width: opts.blob_width,
            pool_width: opts.pool_width,
        })?);

        let metabase = Arc::new(Metabase::open(opts.path.join("meta").join("metabase.db"))?);

        let writecache = match &opts.write_cache {
            Some(wc_opts) => Some(WriteCache::open(
                opts.path.join("cache").join("cache.db"),
                wc_opts.clone(),
                Arc::clone(&blobstore),
                Arc::clone(&metabase),
            )?),
            None => None,
        };

        info!(id = %meta.id, mode = %meta.mode, path = %opts.path.display(), "opened shard");

        Ok(Self {
            id: meta.id,
            mode: Arc::new(RwLock::new(meta.mode)),
            blobstore,
            metabase,
            writecache,
            gc: Mutex::new(None),
            needs_refill: AtomicBool::new(was_dirty || opts.refill_metabase),
            opts,
        })
    }

    /// Initialize the shard: refill the metabase when required and start the
    /// GC coordinator.
    pub fn init(&self) -> Result<()> {
        if self.needs_refill.swap(false, Ordering::Relaxed) {
            self.refill_metabase()?;
        }

        let gc = Gc::start(
            Arc::clone(&self.metabase),
            Arc::clone(&self.blobstore),
            self.writecache.clone(),
            Arc::clone(&self.mode),
            self.opts.gc_remove_interval,
            self.opts.gc_expired_interval,
            self.opts.gc_batch_size,
        );
        *self.gc.lock() = Some(gc);

        Ok(())
    }

    /// Rebuild the metabase from the blob store.
    ///
    /// Tombstones re-inhume their members first, then every object is
    /// re-indexed. Already-removed answers are ignored so the rebuild is
    /// idempotent regardless of iteration order.
    pub fn refill_metabase(&self) -> Result<()> {
        info!(id = %self.id, "refilling metabase");
        self.metabase.reset()?;

        let metabase = Arc::clone(&self.metabase);
        self.blobstore.iterate(|obj, blob_ref| {
            if obj.header.object_type == ObjectType::Tombstone {
                let tomb_addr = obj.address();
                match Tombstone::from_payload(&obj.payload) {
                    Ok(tombstone) => {
                        let members: Vec<Address> = tombstone
                            .members
                            .iter()
                            .map(|oid| Address::new(tomb_addr.container, *oid))
                            .collect();
                        match metabase.inhume(Some(&tomb_addr), &members) {
                            Ok(()) | Err(Error::AlreadyRemoved) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Err(e) => {
                        warn!(addr = %tomb_addr, %e, "skipping bad tombstone payload during refill");
                    }
                }
            }

            match metabase.put(&obj, blob_ref) {
                Ok(()) | Err(Error::AlreadyRemoved) => Ok(()),
                Err(e) => Err(e),
            }
        })?;

        info!(id = %self.id, "metabase refilled");
        Ok(())
    }

    /// Stop the GC, drain the write cache, and mark a clean shutdown.
    pub fn close(&self) -> Result<()> {
        if let Some(gc) = self.gc.lock().take() {
            gc.stop();
        }

        if let Some(wc) = &self.writecache {
            wc.close()?;
        }

        self.store_metadata(false)?;

        info!(id = %self.id, "closed shard");
        Ok(())
    }

    pub(crate) fn store_metadata(&self, dirty: bool) -> Result<()> {
        ShardMetadata {
            id: self.id,
            mode: self.mode(),
            dirty,
        }
        .store(&self.opts.path)
    }
}
