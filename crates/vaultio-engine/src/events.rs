//! Process-wide epoch notification.
//!
//! Components register handlers and receive pushed events; there is no
//! reverse coupling. The engine owns the notifier and forwards every new
//! epoch to each shard's GC.

use parking_lot::Mutex;
use tracing::debug;

type Handler = Box<dyn Fn(u64) + Send + Sync>;

/// Pub/sub fan-out of `NewEpoch` events.
#[derive(Default)]
pub struct EpochNotifier {
    handlers: Mutex<Vec<Handler>>,
}

impl EpochNotifier {
    /// Create an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler invoked on every new epoch.
    pub fn subscribe(&self, handler: impl Fn(u64) + Send + Sync + 'static) {
        self.handlers.lock().push(Box::new(handler));
    }

    /// Broadcast a new epoch to every handler, in subscription order.
    pub fn notify(&self, epoch: u64) {
        let handlers = self.handlers.lock();
        debug!(epoch, subscribers = handlers.len(), "broadcasting new epoch");
        for handler in handlers.iter() {
            handler(epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_all_subscribers_receive_epoch() {
        let notifier = EpochNotifier::new();
        let seen_a = Arc::new(AtomicU64::new(0));
        let seen_b = Arc::new(AtomicU64::new(0));

        {
            let seen = Arc::clone(&seen_a);
            notifier.subscribe(move |e| seen.store(e, Ordering::Relaxed));
        }
        {
            let seen = Arc::clone(&seen_b);
            notifier.subscribe(move |e| seen.store(e, Ordering::Relaxed));
        }

        notifier.notify(42);

        assert_eq!(seen_a.load(Ordering::Relaxed), 42);
        assert_eq!(seen_b.load(Ordering::Relaxed), 42);
    }
}
