//! Vaultio engine - the shard fan-out layer
//!
//! The engine holds an indexed set of shards with per-shard weights, routes
//! every operation through a deterministic rendezvous-hashed shard order,
//! aggregates per-shard outcomes, and demotes shards that keep failing.

mod events;
mod hrw;
mod ops;

pub use events::EpochNotifier;
pub use ops::ListToken;

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use vaultio_core::{Address, Error, Result};
use vaultio_shard::{Shard, ShardMode};

pub(crate) struct ShardHandle {
    pub shard: Arc<Shard>,
    pub weight: f64,
    pub errors: AtomicU32,
}

/// The local storage engine: an indexed set of shards.
pub struct Engine {
    shards: RwLock<Vec<Arc<ShardHandle>>>,
    notifier: EpochNotifier,
}

impl Engine {
    /// Create an engine with no shards.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: RwLock::new(Vec::new()),
            notifier: EpochNotifier::new(),
        }
    }

    /// Register an opened and initialized shard with a routing weight.
    ///
    /// The shard's GC is subscribed to the engine's epoch notifier.
    pub fn add_shard(&self, shard: Shard, weight: f64) -> Uuid {
        let shard = Arc::new(shard);
        let id = shard.id();

        {
            let shard = Arc::clone(&shard);
            self.notifier.subscribe(move |epoch| shard.notify_epoch(epoch));
        }

        self.shards.write().push(Arc::new(ShardHandle {
            shard,
            weight,
            errors: AtomicU32::new(0),
        }));

        info!(%id, weight, "added shard");
        id
    }

    /// The shard with the given identifier.
    #[must_use]
    pub fn shard(&self, id: Uuid) -> Option<Arc<Shard>> {
        self.shards
            .read()
            .iter()
            .find(|h| h.shard.id() == id)
            .map(|h| Arc::clone(&h.shard))
    }

    /// Identifiers of every registered shard, in registration order.
    #[must_use]
    pub fn shard_ids(&self) -> Vec<Uuid> {
        self.shards.read().iter().map(|h| h.shard.id()).collect()
    }

    /// Broadcast a new epoch to every shard's GC.
    pub fn notify_new_epoch(&self, epoch: u64) {
        self.notifier.notify(epoch);
    }

    /// Close every shard.
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        for handle in self.shards.read().iter() {
            if let Err(e) = handle.shard.close() {
                warn!(id = %handle.shard.id(), %e, "shard close failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Shards in the address's rendezvous order.
    pub(crate) fn sorted_shards(&self, addr: &Address) -> Vec<Arc<ShardHandle>> {
        let mut handles: Vec<Arc<ShardHandle>> = self.shards.read().clone();
        hrw::sort_for(addr, &mut handles, |h| (h.shard.id(), h.weight));
        handles
    }

    /// Shards in registration order (for broadcasts and listing).
    pub(crate) fn all_shards(&self) -> Vec<Arc<ShardHandle>> {
        self.shards.read().clone()
    }

    /// Count a store failure against a shard; demote it at the threshold.
    pub(crate) fn report_shard_error(&self, handle: &ShardHandle, err: &Error) {
        if !err.is_store_failure() {
            return;
        }

        let errors = handle.errors.fetch_add(1, Ordering::Relaxed) + 1;
        let threshold = handle.shard.options().error_threshold;
        warn!(
            id = %handle.shard.id(),
            %err,
            errors,
            threshold,
            "shard error"
        );

        if errors >= threshold && handle.shard.mode() != ShardMode::Degraded {
            warn!(id = %handle.shard.id(), "error threshold reached, demoting shard");
            if let Err(e) = handle.shard.set_mode(ShardMode::Degraded) {
                warn!(id = %handle.shard.id(), %e, "failed to demote shard");
            }
        }
    }

    /// Call a shard operation, retrying a transient store failure once.
    pub(crate) fn call_shard<T>(
        &self,
        handle: &ShardHandle,
        f: impl Fn() -> Result<T>,
    ) -> Result<T> {
        match f() {
            Err(e) if e.is_store_failure() => {
                self.report_shard_error(handle, &e);
                match f() {
                    Err(e) if e.is_store_failure() => {
                        self.report_shard_error(handle, &e);
                        Err(e)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultio_core::ShardOptions;

    #[test]
    fn test_error_threshold_demotes_shard() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = ShardOptions::new(dir.path());
        opts.error_threshold = 2;
        opts.gc_remove_interval = std::time::Duration::from_secs(3600);

        let engine = Engine::new();
        let shard = Shard::open(opts).unwrap();
        shard.init().unwrap();
        let id = engine.add_shard(shard, 1.0);

        let handle = engine.all_shards().pop().unwrap();
        let err = Error::Database("simulated".into());

        engine.report_shard_error(&handle, &err);
        assert_eq!(engine.shard(id).unwrap().mode(), ShardMode::ReadWrite);

        engine.report_shard_error(&handle, &err);
        assert_eq!(engine.shard(id).unwrap().mode(), ShardMode::Degraded);

        // per-object outcomes never count against the shard
        engine.report_shard_error(&handle, &Error::NotFound);
        assert_eq!(handle.errors.load(Ordering::Relaxed), 2);

        engine.close().unwrap();
    }
}
