//! Vaultio write cache - small-object staging tier
//!
//! An optional bounded cache in front of the blob store. Admitted objects
//! are staged in a local database and remain fully readable; a background
//! flush loop drains them into the blob store, installs the metabase record
//! with the resulting back-reference, and drops the staged copy.
//!
//! Admission is refused (`WriteCacheFull`) when the object is too large or
//! capacity is reached; callers then bypass straight to the blob store.

use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use vaultio_blobstore::BlobStore;
use vaultio_core::{Address, Error, Object, Result, WriteCacheOptions};
use vaultio_metabase::Metabase;

const STAGED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("staged");

/// How many objects one flush pass moves at most.
const FLUSH_BATCH: usize = 32;

/// Bounded staging tier for small objects.
pub struct WriteCache {
    db: Database,
    /// Staged payload bytes, admission-checked against capacity.
    used: AtomicU64,
    opts: WriteCacheOptions,
    blobstore: Arc<BlobStore>,
    metabase: Arc<Metabase>,
    stop_tx: Mutex<Option<Sender<()>>>,
    flush_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WriteCache {
    /// Open (or create) the cache at `path` and start the flush loop.
    pub fn open(
        path: impl AsRef<Path>,
        opts: WriteCacheOptions,
        blobstore: Arc<BlobStore>,
        metabase: Arc<Metabase>,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let db = Database::create(path)?;
        let wtx = db.begin_write()?;
        wtx.open_table(STAGED)?;
        wtx.commit()?;

        let cache = Arc::new(Self {
            db,
            used: AtomicU64::new(0),
            opts,
            blobstore,
            metabase,
            stop_tx: Mutex::new(None),
            flush_handle: Mutex::new(None),
        });

        // account for entries staged before a restart
        let mut used = 0u64;
        cache.iterate(|obj| {
            used += obj.header.payload_size;
            Ok(())
        })?;
        cache.used.store(used, Ordering::Relaxed);

        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.flush_loop(stop_rx))
        };
        *cache.stop_tx.lock() = Some(stop_tx);
        *cache.flush_handle.lock() = Some(handle);

        debug!(path = %path.display(), staged_bytes = used, "opened write cache");
        Ok(cache)
    }

    /// Stage an object. Fails with `WriteCacheFull` when admission is refused.
    pub fn put(&self, obj: &Object) -> Result<()> {
        let size = obj.header.payload_size;
        if size > self.opts.max_object_size {
            return Err(Error::WriteCacheFull);
        }
        if self.used.load(Ordering::Relaxed) + size > self.opts.capacity {
            return Err(Error::WriteCacheFull);
        }

        let addr = obj.address();
        let frame = obj.to_frame()?;

        let wtx = self.db.begin_write()?;
        let replaced = {
            let mut staged = wtx.open_table(STAGED)?;
            let x = staged
                .insert(addr.to_bytes().as_slice(), frame.as_ref())?
                .is_some();
            x
        };
        wtx.commit()?;

        if !replaced {
            self.used.fetch_add(size, Ordering::Relaxed);
        }

        debug!(%addr, size, "writecache PUT");
        Ok(())
    }

    /// Read a staged object.
    pub fn get(&self, addr: &Address) -> Result<Object> {
        let rtx = self.db.begin_read()?;
        let staged = rtx.open_table(STAGED)?;
        match staged.get(addr.to_bytes().as_slice())? {
            Some(v) => Object::from_frame(v.value()),
            None => Err(Error::NotFound),
        }
    }

    /// Read a staged header.
    pub fn head(&self, addr: &Address) -> Result<Object> {
        Ok(self.get(addr)?.cut_payload())
    }

    /// Whether the address is staged.
    pub fn exists(&self, addr: &Address) -> Result<bool> {
        let rtx = self.db.begin_read()?;
        let staged = rtx.open_table(STAGED)?;
        Ok(staged.get(addr.to_bytes().as_slice())?.is_some())
    }

    /// Drop a staged object. Returns `NotFound` if absent.
    pub fn delete(&self, addr: &Address) -> Result<()> {
        let wtx = self.db.begin_write()?;
        let removed = {
            let mut staged = wtx.open_table(STAGED)?;
            let x = staged
                .remove(addr.to_bytes().as_slice())?
                .map(|v| match Object::from_frame(v.value()) {
                    Ok(obj) => obj.header.payload_size,
                    Err(_) => 0,
                });
            x
        };
        wtx.commit()?;

        match removed {
            Some(size) => {
                self.used.fetch_sub(size, Ordering::Relaxed);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Visit every staged object.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Object) -> Result<()>,
    {
        let rtx = self.db.begin_read()?;
        let staged = rtx.open_table(STAGED)?;
        for entry in staged.iter()? {
            let (_, value) = entry?;
            match Object::from_frame(value.value()) {
                Ok(obj) => f(&obj)?,
                Err(e) => warn!(%e, "skipping corrupt staged record"),
            }
        }
        Ok(())
    }

    /// Currently staged payload bytes.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Move up to [`FLUSH_BATCH`] staged objects into the blob store.
    ///
    /// Order of installs matters: blob first, then the metabase record with
    /// the resulting back-reference, then the staged copy is dropped. An
    /// object whose address got buried while staged is simply dropped.
    pub fn flush_once(&self) -> Result<usize> {
        let mut batch = Vec::with_capacity(FLUSH_BATCH);
        self.iterate(|obj| {
            if batch.len() < FLUSH_BATCH {
                batch.push(obj.clone());
            }
            Ok(())
        })?;

        let mut flushed = 0;
        for obj in batch {
            let addr = obj.address();

            let blob_ref = self.blobstore.put(&obj)?;
            match self.metabase.put(&obj, blob_ref) {
                Ok(()) | Err(Error::AlreadyRemoved) => {}
                Err(e) => return Err(e),
            }

            match self.delete(&addr) {
                Ok(()) | Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
            flushed += 1;
        }

        Ok(flushed)
    }

    fn flush_loop(&self, stop_rx: Receiver<()>) {
        debug!("write cache flush loop started");

        loop {
            match stop_rx.recv_timeout(self.opts.flush_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            match self.flush_once() {
                Ok(0) => {}
                Ok(n) => debug!(flushed = n, "write cache flush pass"),
                Err(e) => warn!(%e, "write cache flush failed"),
            }
        }

        debug!("write cache flush loop stopped");
    }

    /// Stop the flush loop and drain what is still staged.
    pub fn close(&self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.flush_handle.lock().take() {
            let _ = handle.join();
        }

        // final drain so a clean shutdown leaves nothing staged
        loop {
            match self.flush_once() {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(%e, "write cache final flush failed");
                    break;
                }
            }
        }

        info!("write cache closed");
        Ok(())
    }
}
