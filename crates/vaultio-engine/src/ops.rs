//! Engine operations: fan-out, aggregation, short-circuits.

use crate::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;
use uuid::Uuid;
use vaultio_core::{Address, ContainerId, Deadline, Error, Object, ObjectHeader, ObjectId, Result};
use vaultio_metabase::{ListCursor, SelectFilters};
use vaultio_shard::ShardMode;

/// Continuation token of [`Engine::list`]: the shard being listed plus its
/// metabase cursor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListToken {
    shard: Uuid,
    cursor: Option<ListCursor>,
}

impl Engine {
    /// Store an object on the first eligible shard in rendezvous order.
    ///
    /// Shards that are not writable or out of space are skipped; the last
    /// error surfaces when no shard accepts the object.
    pub fn put(&self, obj: &Object, deadline: Deadline) -> Result<()> {
        let addr = obj.address();
        let mut last_err = Error::invalid_argument("no shards configured");

        for handle in self.sorted_shards(&addr) {
            deadline.check()?;

            if handle.shard.mode() != ShardMode::ReadWrite {
                last_err = Error::ReadOnlyMode;
                continue;
            }

            match self.call_shard(&handle, || handle.shard.put(obj)) {
                Ok(()) => return Ok(()),
                Err(Error::AlreadyRemoved) => return Err(Error::AlreadyRemoved),
                Err(e @ (Error::ReadOnlyMode | Error::InsufficientSpace)) => {
                    last_err = e;
                }
                Err(e) if e.is_store_failure() => last_err = e,
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    /// Fetch an object; the first shard with an authoritative answer wins.
    pub fn get(&self, addr: &Address, raw: bool, deadline: Deadline) -> Result<Object> {
        self.first_hit(addr, deadline, |handle| {
            self.call_shard(handle, || handle.shard.get(addr, raw))
        })
    }

    /// Fetch a header.
    pub fn head(&self, addr: &Address, raw: bool, deadline: Deadline) -> Result<ObjectHeader> {
        self.first_hit(addr, deadline, |handle| {
            self.call_shard(handle, || handle.shard.head(addr, raw))
        })
    }

    /// Read a bounded payload range.
    pub fn get_range(
        &self,
        addr: &Address,
        offset: u64,
        length: u64,
        deadline: Deadline,
    ) -> Result<Bytes> {
        self.first_hit(addr, deadline, |handle| {
            self.call_shard(handle, || handle.shard.get_range(addr, offset, length))
        })
    }

    /// Whether any shard stores the object.
    ///
    /// A shard reporting `AlreadyRemoved` wins immediately regardless of
    /// ordering; otherwise the boolean answers are OR-reduced. Shard errors
    /// are counted, and fatal only when every shard fails.
    pub fn exists(&self, addr: &Address, deadline: Deadline) -> Result<bool> {
        let handles = self.sorted_shards(addr);
        let mut exists = false;
        let mut failures = 0;
        let mut last_err = None;

        for handle in &handles {
            deadline.check()?;

            match self.call_shard(handle, || handle.shard.exists(addr)) {
                Ok(found) => exists = exists || found,
                Err(Error::AlreadyRemoved) => return Err(Error::AlreadyRemoved),
                Err(e) => {
                    failures += 1;
                    last_err = Some(e);
                }
            }
        }

        if !handles.is_empty() && failures == handles.len() {
            return Err(last_err.unwrap_or(Error::NotFound));
        }
        Ok(exists)
    }

    /// Physically remove objects from every shard, best-effort.
    pub fn delete(&self, addrs: &[Address], deadline: Deadline) -> Result<()> {
        for handle in self.all_shards() {
            deadline.check()?;

            if handle.shard.mode() != ShardMode::ReadWrite {
                continue;
            }
            if let Err(e) = self.call_shard(&handle, || handle.shard.delete(addrs)) {
                warn!(id = %handle.shard.id(), %e, "shard delete failed");
            }
        }
        Ok(())
    }

    /// Mark addresses as removed on every shard.
    ///
    /// The first `ObjectLocked` aborts and surfaces unchanged.
    pub fn inhume(
        &self,
        tombstone: Option<&Address>,
        addrs: &[Address],
        deadline: Deadline,
    ) -> Result<()> {
        for handle in self.all_shards() {
            deadline.check()?;

            match self.call_shard(&handle, || handle.shard.inhume(tombstone, addrs)) {
                Ok(()) | Err(Error::ReadOnlyMode) => {}
                Err(Error::ObjectLocked) => return Err(Error::ObjectLocked),
                Err(e) => warn!(id = %handle.shard.id(), %e, "shard inhume failed"),
            }
        }
        Ok(())
    }

    /// Record a locker on every shard that can take it.
    pub fn lock(
        &self,
        container: &ContainerId,
        locker: ObjectId,
        targets: &[ObjectId],
        deadline: Deadline,
    ) -> Result<()> {
        for handle in self.all_shards() {
            deadline.check()?;

            match self.call_shard(&handle, || handle.shard.lock(container, locker, targets)) {
                Ok(()) | Err(Error::ReadOnlyMode) => {}
                Err(e) => warn!(id = %handle.shard.id(), %e, "shard lock failed"),
            }
        }
        Ok(())
    }

    /// Search a container across every shard; results are unioned.
    pub fn select(
        &self,
        container: &ContainerId,
        filters: &SelectFilters,
        deadline: Deadline,
    ) -> Result<Vec<Address>> {
        let mut out = BTreeSet::new();

        for handle in self.all_shards() {
            deadline.check()?;

            match self.call_shard(&handle, || handle.shard.select(container, filters)) {
                Ok(addrs) => out.extend(addrs),
                Err(e) => warn!(id = %handle.shard.id(), %e, "shard select failed"),
            }
        }

        Ok(out.into_iter().collect())
    }

    /// Page through every shard's stored addresses.
    ///
    /// The token pins the shard being listed; shards advance in registration
    /// order, independent of rendezvous ordering.
    pub fn list(
        &self,
        limit: usize,
        token: Option<&ListToken>,
    ) -> Result<(Vec<Address>, Option<ListToken>)> {
        let handles = self.all_shards();
        if handles.is_empty() || limit == 0 {
            return Ok((Vec::new(), None));
        }

        let mut start = 0;
        let mut cursor: Option<ListCursor> = None;
        if let Some(token) = token {
            match handles.iter().position(|h| h.shard.id() == token.shard) {
                Some(idx) => {
                    start = idx;
                    cursor = token.cursor.clone();
                }
                // the shard left the set; restart from the next registered one
                None => start = 0,
            }
        }

        let mut out = Vec::with_capacity(limit);
        for (idx, handle) in handles.iter().enumerate().skip(start) {
            let want = limit - out.len();
            let (page, next) =
                self.call_shard(handle, || {
                    handle.shard.list_with_cursor(want, cursor.as_ref())
                })?;
            cursor = None;
            out.extend(page);

            if out.len() == limit {
                // continue within this shard, or from the next one
                let token = match next {
                    Some(next) => Some(ListToken {
                        shard: handle.shard.id(),
                        cursor: Some(next),
                    }),
                    None => handles.get(idx + 1).map(|h| ListToken {
                        shard: h.shard.id(),
                        cursor: None,
                    }),
                };
                return Ok((out, token));
            }
        }

        Ok((out, None))
    }

    /// First-success fan-out for read operations.
    ///
    /// `AlreadyRemoved`, split info, and range errors short-circuit; shards
    /// answering `NotFound` are passed over; store failures are counted and
    /// the scan continues. A fully-missing object aggregates to `NotFound`.
    fn first_hit<T>(
        &self,
        addr: &Address,
        deadline: Deadline,
        f: impl Fn(&crate::ShardHandle) -> Result<T>,
    ) -> Result<T> {
        for handle in self.sorted_shards(addr) {
            deadline.check()?;

            match f(&handle) {
                Ok(v) => return Ok(v),
                Err(Error::NotFound) => {}
                Err(e) if e.is_store_failure() => {
                    // already counted by call_shard; try the next shard
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound)
    }
}
