//! Shard-local garbage collection.
//!
//! One coordinator thread per shard drives two activities:
//! - a periodic sweep that physically removes GC-marked graveyard entries
//! - epoch-driven collectors for expired objects, tombstones, and locks
//!
//! A new-epoch event arriving mid-sweep interrupts the predecessor at batch
//! granularity and restarts collection at the newer epoch.

use crate::ShardMode;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vaultio_blobstore::BlobStore;
use vaultio_core::{Address, Error, ObjectType, Result};
use vaultio_metabase::Metabase;
use vaultio_writecache::WriteCache;

enum GcEvent {
    NewEpoch(u64),
    Stop,
}

/// Handle to a shard's GC coordinator.
pub(crate) struct Gc {
    tx: Sender<GcEvent>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Gc {
    pub fn start(
        metabase: Arc<Metabase>,
        blobstore: Arc<BlobStore>,
        writecache: Option<Arc<WriteCache>>,
        mode: Arc<RwLock<ShardMode>>,
        remove_interval: Duration,
        expired_interval: Duration,
        batch_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel();

        let worker = GcWorker {
            metabase,
            blobstore,
            writecache,
            mode,
            remove_interval,
            expired_interval,
            batch_size: batch_size.max(1),
            rx,
            pending: None,
            last_epoch: None,
        };
        let handle = thread::spawn(move || worker.run());

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Deliver a new-epoch event.
    pub fn notify_epoch(&self, epoch: u64) {
        let _ = self.tx.send(GcEvent::NewEpoch(epoch));
    }

    /// Stop the coordinator and wait for it.
    pub fn stop(mut self) {
        let _ = self.tx.send(GcEvent::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct GcWorker {
    metabase: Arc<Metabase>,
    blobstore: Arc<BlobStore>,
    writecache: Option<Arc<WriteCache>>,
    mode: Arc<RwLock<ShardMode>>,
    remove_interval: Duration,
    expired_interval: Duration,
    batch_size: usize,
    rx: Receiver<GcEvent>,
    /// Event observed while sweeping; processed before blocking again.
    pending: Option<GcEvent>,
    /// Newest epoch seen; re-swept on the expired-interval timer when no
    /// fresh event arrives.
    last_epoch: Option<u64>,
}

impl GcWorker {
    fn run(mut self) {
        debug!("shard GC started");

        let mut next_remove = Instant::now() + self.remove_interval;
        let mut next_expired = Instant::now() + self.expired_interval;

        loop {
            let wake = next_remove.min(next_expired);
            let timeout = wake.saturating_duration_since(Instant::now());

            let event = match self.pending.take() {
                Some(event) => Some(event),
                None => match self.rx.recv_timeout(timeout) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            match event {
                Some(GcEvent::Stop) => break,
                Some(GcEvent::NewEpoch(epoch)) => {
                    let epoch = self.coalesce_epochs(epoch);
                    if self.pending.is_some() {
                        continue; // Stop arrived while coalescing
                    }
                    self.last_epoch = Some(epoch);
                    self.handle_new_epoch(epoch);
                    next_expired = Instant::now() + self.expired_interval;
                }
                None => {
                    let now = Instant::now();
                    if now >= next_remove {
                        next_remove = now + self.remove_interval;
                        if self.writable() {
                            if let Err(e) = self.remove_garbage() {
                                warn!(%e, "garbage removal failed");
                            }
                        }
                    }
                    if now >= next_expired {
                        next_expired = now + self.expired_interval;
                        if let Some(epoch) = self.last_epoch {
                            self.handle_new_epoch(epoch);
                        }
                    }
                }
            }
        }

        debug!("shard GC stopped");
    }

    fn writable(&self) -> bool {
        *self.mode.read() == ShardMode::ReadWrite
    }

    /// Collapse queued epoch events into the newest one.
    fn coalesce_epochs(&mut self, mut epoch: u64) -> u64 {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                GcEvent::NewEpoch(e) => epoch = epoch.max(e),
                GcEvent::Stop => {
                    self.pending = Some(GcEvent::Stop);
                    break;
                }
            }
        }
        epoch
    }

    /// A queued event interrupts the running sweep.
    fn interrupted(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        if let Ok(event) = self.rx.try_recv() {
            self.pending = Some(event);
            return true;
        }
        false
    }

    fn handle_new_epoch(&mut self, epoch: u64) {
        if !self.writable() {
            return;
        }
        debug!(epoch, "GC epoch sweep");

        let steps: [fn(&mut Self, u64) -> Result<()>; 3] = [
            Self::collect_expired_objects,
            Self::collect_expired_tombstones,
            Self::collect_expired_locks,
        ];
        for step in steps {
            if self.interrupted() {
                return;
            }
            if let Err(e) = step(self, epoch) {
                warn!(epoch, %e, "GC collector failed");
            }
        }
    }

    /// Expired regular objects are buried with a bare GC mark; the next
    /// garbage sweep removes them physically. Locked objects are skipped.
    fn collect_expired_objects(&mut self, epoch: u64) -> Result<()> {
        let mut expired = Vec::new();
        self.metabase.iterate_expired(epoch, |addr, ty| {
            if ty == ObjectType::Regular {
                expired.push(addr);
            }
            Ok(())
        })?;

        let mut kept = Vec::with_capacity(expired.len());
        for addr in expired {
            if !self.metabase.is_locked(&addr)? {
                kept.push(addr);
            }
        }

        self.bury_batches(&kept)
    }

    /// An expired tombstone frees both itself and its members for physical
    /// removal: every graveyard entry it covers is re-marked as garbage, then
    /// the tombstone joins them.
    fn collect_expired_tombstones(&mut self, epoch: u64) -> Result<()> {
        let mut tombstones = Vec::new();
        self.metabase.iterate_expired(epoch, |addr, ty| {
            if ty == ObjectType::Tombstone {
                tombstones.push(addr);
            }
            Ok(())
        })?;
        if tombstones.is_empty() {
            return Ok(());
        }

        let set: HashSet<Address> = tombstones.iter().copied().collect();
        let mut members = Vec::new();
        self.metabase.iterate_covered_by_tombstones(&set, |addr| {
            members.push(addr);
            Ok(())
        })?;

        debug!(
            tombstones = tombstones.len(),
            members = members.len(),
            "expired tombstones release members"
        );

        self.bury_batches(&members)?;
        self.bury_batches(&tombstones)
    }

    /// Expired lock objects release their targets and become garbage
    /// themselves; released targets re-enter normal GC consideration.
    fn collect_expired_locks(&mut self, epoch: u64) -> Result<()> {
        let mut locks = Vec::new();
        self.metabase.iterate_expired(epoch, |addr, ty| {
            if ty == ObjectType::Lock {
                locks.push(addr);
            }
            Ok(())
        })?;
        if locks.is_empty() {
            return Ok(());
        }

        let released = self.metabase.free_locked_by(&locks)?;
        debug!(locks = locks.len(), released = released.len(), "expired locks freed");

        self.bury_batches(&locks)
    }

    /// GC-mark addresses in interruptible batches.
    fn bury_batches(&mut self, addrs: &[Address]) -> Result<()> {
        for batch in addrs.chunks(self.batch_size) {
            if self.interrupted() {
                return Ok(());
            }
            match self.metabase.inhume(None, batch) {
                Ok(()) => {}
                // a member got locked meanwhile; bury the rest one by one
                Err(Error::ObjectLocked) => {
                    for addr in batch {
                        match self.metabase.inhume(None, std::slice::from_ref(addr)) {
                            Ok(()) | Err(Error::ObjectLocked) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drain GC-marked graveyard entries: blobs first (best effort), then
    /// the index records, one transaction per batch.
    fn remove_garbage(&mut self) -> Result<()> {
        loop {
            let mut batch = Vec::with_capacity(self.batch_size);
            self.metabase.iterate_graveyard(|addr, tomb| {
                if tomb.is_none() && batch.len() < self.batch_size {
                    batch.push(addr);
                }
                Ok(())
            })?;

            if batch.is_empty() {
                return Ok(());
            }

            for addr in &batch {
                if let Some(wc) = &self.writecache {
                    match wc.delete(addr) {
                        Ok(()) | Err(Error::NotFound) => {}
                        Err(e) => warn!(%addr, %e, "write cache delete failed"),
                    }
                }

                let blob_ref = self.metabase.blob_ref(addr).unwrap_or(None);
                match self.blobstore.delete(addr, blob_ref) {
                    Ok(()) | Err(Error::NotFound) => {}
                    Err(e) => warn!(%addr, %e, "blob delete failed"),
                }
            }

            self.metabase.delete(&batch)?;
            debug!(removed = batch.len(), "garbage batch removed");

            if self.interrupted() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{new_shard, sample_object_in};
    use crate::Shard;
    use vaultio_core::{Attribute, ContainerId, Tombstone, ATTR_EXPIRATION_EPOCH};

    /// Drive the collectors synchronously, the way the coordinator does.
    fn run_epoch(shard: &Shard, epoch: u64) {
        let (_tx, rx) = mpsc::channel();
        let mut worker = GcWorker {
            metabase: Arc::clone(&shard.metabase),
            blobstore: Arc::clone(&shard.blobstore),
            writecache: shard.writecache.clone(),
            mode: Arc::clone(&shard.mode),
            remove_interval: Duration::from_secs(3600),
            expired_interval: Duration::from_secs(3600),
            batch_size: 4,
            rx,
            pending: None,
            last_epoch: None,
        };
        worker.handle_new_epoch(epoch);
        worker.remove_garbage().unwrap();
    }

    #[test]
    fn test_expired_objects_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let shard = new_shard(dir.path(), false);

        let cid = ContainerId::new(rand::random());
        let mut expired = sample_object_in(cid, vaultio_core::ObjectType::Regular);
        expired
            .header
            .attributes
            .push(Attribute::new(ATTR_EXPIRATION_EPOCH, "10"));
        let fresh = sample_object_in(cid, vaultio_core::ObjectType::Regular);

        shard.put(&expired).unwrap();
        shard.put(&fresh).unwrap();

        run_epoch(&shard, 11);

        assert!(!shard.exists(&expired.address()).unwrap());
        assert!(shard.exists(&fresh.address()).unwrap());

        shard.close().unwrap();
    }

    #[test]
    fn test_locked_object_survives_expiration() {
        let dir = tempfile::tempdir().unwrap();
        let shard = new_shard(dir.path(), false);

        let cid = ContainerId::new(rand::random());
        let mut obj = sample_object_in(cid, vaultio_core::ObjectType::Regular);
        obj.header
            .attributes
            .push(Attribute::new(ATTR_EXPIRATION_EPOCH, "10"));
        let locker = sample_object_in(cid, vaultio_core::ObjectType::Lock);

        shard.put(&obj).unwrap();
        shard.lock(&cid, locker.header.id, &[obj.header.id]).unwrap();

        run_epoch(&shard, 11);

        assert!(shard.exists(&obj.address()).unwrap());

        shard.close().unwrap();
    }

    #[test]
    fn test_expired_tombstone_releases_members() {
        let dir = tempfile::tempdir().unwrap();
        let shard = new_shard(dir.path(), false);

        let cid = ContainerId::new(rand::random());
        let victim = sample_object_in(cid, vaultio_core::ObjectType::Regular);
        shard.put(&victim).unwrap();

        let mut tomb = sample_object_in(cid, vaultio_core::ObjectType::Tombstone);
        let tombstone = Tombstone {
            expiration_epoch: 20,
            members: vec![victim.header.id],
        };
        tomb.payload = tombstone.to_payload().unwrap();
        tomb.header.payload_size = tomb.payload.len() as u64;
        tomb.header
            .attributes
            .push(Attribute::new(ATTR_EXPIRATION_EPOCH, "20"));
        shard.put(&tomb).unwrap();
        shard.inhume(Some(&tomb.address()), &[victim.address()]).unwrap();

        // before the tombstone expires, the burial holds
        run_epoch(&shard, 15);
        assert!(matches!(
            shard.exists(&victim.address()),
            Err(Error::AlreadyRemoved)
        ));
        assert!(shard.exists(&tomb.address()).unwrap());

        // once expired, tombstone and member are physically gone
        run_epoch(&shard, 21);
        assert!(!shard.exists(&victim.address()).unwrap());
        assert!(!shard.exists(&tomb.address()).unwrap());

        shard.close().unwrap();
    }

    #[test]
    fn test_expired_lock_unlocks_targets() {
        let dir = tempfile::tempdir().unwrap();
        let shard = new_shard(dir.path(), false);

        let cid = ContainerId::new(rand::random());
        let obj = sample_object_in(cid, vaultio_core::ObjectType::Regular);
        let mut locker = sample_object_in(cid, vaultio_core::ObjectType::Lock);
        locker
            .header
            .attributes
            .push(Attribute::new(ATTR_EXPIRATION_EPOCH, "30"));

        shard.put(&obj).unwrap();
        shard.put(&locker).unwrap();
        shard.lock(&cid, locker.header.id, &[obj.header.id]).unwrap();

        let tomb = sample_object_in(cid, vaultio_core::ObjectType::Tombstone);
        assert!(matches!(
            shard.inhume(Some(&tomb.address()), &[obj.address()]),
            Err(Error::ObjectLocked)
        ));

        run_epoch(&shard, 31);

        // the lock expired: the target can be inhumed now
        shard.inhume(Some(&tomb.address()), &[obj.address()]).unwrap();
        assert!(matches!(
            shard.exists(&obj.address()),
            Err(Error::AlreadyRemoved)
        ));

        shard.close().unwrap();
    }
}
