//! Per-address shard operations.

use crate::{Shard, ShardMode};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tracing::warn;
use vaultio_core::{Address, ContainerId, Error, Object, ObjectHeader, ObjectId, Result};
use vaultio_metabase::{ListCursor, SelectFilters};

impl Shard {
    /// Store an object.
    ///
    /// Admitted objects go through the write cache when one is configured;
    /// otherwise the blob is installed first, then the metabase record with
    /// the back-reference. A metabase refusal leaves the blob behind as
    /// refill-recoverable garbage.
    pub fn put(&self, obj: &Object) -> Result<()> {
        self.ensure_writable()?;

        if let Some(wc) = &self.writecache {
            match wc.put(obj) {
                Ok(()) => return Ok(()),
                Err(Error::WriteCacheFull) => {} // bypass to the blob store
                Err(e) => return Err(e),
            }
        }

        let blob_ref = self.blobstore.put(obj)?;
        self.metabase.put(obj, blob_ref)
    }

    /// Fetch an object with payload.
    ///
    /// Virtual parents are assembled from their parts unless `raw` is set,
    /// in which case the split info surfaces as an error.
    pub fn get(&self, addr: &Address, raw: bool) -> Result<Object> {
        if self.mode() == ShardMode::Degraded {
            return self.blobstore.get(addr, None);
        }

        if let Some(wc) = &self.writecache {
            match wc.get(addr) {
                Ok(obj) => return Ok(obj),
                Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        let head = self.metabase.get(addr, raw)?;

        match self.metabase.blob_ref(addr)? {
            Some(blob_ref) => self.blobstore.get(addr, Some(blob_ref)),
            None => {
                let children = self.metabase.children(addr)?;
                if children.is_empty() {
                    // indexed without a back-reference; probe both sub-stores
                    self.blobstore.get(addr, None)
                } else {
                    self.assemble(addr, head.header, &children)
                }
            }
        }
    }

    /// Fetch a header only.
    pub fn head(&self, addr: &Address, raw: bool) -> Result<ObjectHeader> {
        if self.mode() == ShardMode::Degraded {
            return Ok(self.blobstore.get(addr, None)?.header);
        }

        if let Some(wc) = &self.writecache {
            match wc.head(addr) {
                Ok(obj) => return Ok(obj.header),
                Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        self.metabase.head(addr, raw)
    }

    /// Read a bounded payload range.
    pub fn get_range(&self, addr: &Address, offset: u64, length: u64) -> Result<Bytes> {
        if self.mode() == ShardMode::Degraded {
            return self.blobstore.get_range(addr, offset, length, None);
        }

        if let Some(wc) = &self.writecache {
            match wc.get(addr) {
                Ok(obj) => return slice_payload(&obj, offset, length),
                Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        let head = self.metabase.get(addr, false)?;

        match self.metabase.blob_ref(addr)? {
            Some(blob_ref) => self.blobstore.get_range(addr, offset, length, Some(blob_ref)),
            None => {
                let children = self.metabase.children(addr)?;
                if children.is_empty() {
                    self.blobstore.get_range(addr, offset, length, None)
                } else {
                    let assembled = self.assemble(addr, head.header, &children)?;
                    slice_payload(&assembled, offset, length)
                }
            }
        }
    }

    /// Whether the object is present. `AlreadyRemoved` short-circuits.
    pub fn exists(&self, addr: &Address) -> Result<bool> {
        if self.mode() == ShardMode::Degraded {
            return self.blobstore.exists(addr);
        }

        if let Some(wc) = &self.writecache {
            if wc.exists(addr)? {
                return Ok(true);
            }
        }

        self.metabase.exists(addr)
    }

    /// Physically remove objects from both stores.
    ///
    /// Blob removal is best-effort: a failure is logged and the index
    /// cleanup continues, since a stray blob is reconciled by refill.
    pub fn delete(&self, addrs: &[Address]) -> Result<()> {
        self.ensure_writable()?;

        for addr in addrs {
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

        self.metabase.delete(addrs)
    }

    /// Mark addresses as logically removed. `ObjectLocked` aborts.
    pub fn inhume(&self, tombstone: Option<&Address>, addrs: &[Address]) -> Result<()> {
        self.ensure_writable()?;
        self.metabase.inhume(tombstone, addrs)
    }

    /// Record a locker keeping each target alive.
    pub fn lock(
        &self,
        container: &ContainerId,
        locker: ObjectId,
        targets: &[ObjectId],
    ) -> Result<()> {
        self.ensure_writable()?;
        self.metabase.lock(container, locker, targets)
    }

    /// Search the container.
    pub fn select(&self, container: &ContainerId, filters: &SelectFilters) -> Result<Vec<Address>> {
        self.metabase.select(container, filters)
    }

    /// Page through the shard's stored addresses.
    pub fn list_with_cursor(
        &self,
        limit: usize,
        cursor: Option<&ListCursor>,
    ) -> Result<(Vec<Address>, Option<ListCursor>)> {
        self.metabase.list_with_cursor(limit, cursor)
    }

    /// Schedule an address for relocation to another shard.
    pub fn to_move_it(&self, addr: &Address) -> Result<()> {
        self.ensure_writable()?;
        self.metabase.to_move_it(addr)
    }

    /// Visit every address scheduled for relocation.
    pub fn iterate_to_move<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(Address) -> Result<()>,
    {
        self.metabase.iterate_to_move(f)
    }

    /// Drop a relocation record once the move completed (or was abandoned).
    pub fn drop_move(&self, addr: &Address) -> Result<()> {
        self.ensure_writable()?;
        self.metabase.drop_move(addr)
    }

    /// Reconstruct a split object's payload by walking the part chain.
    fn assemble(
        &self,
        addr: &Address,
        parent: ObjectHeader,
        children: &[ObjectId],
    ) -> Result<Object> {
        // map previous-part id -> part header, then follow from the chain head
        let mut by_previous: HashMap<Option<ObjectId>, ObjectHeader> = HashMap::new();
        for child in children {
            let child_addr = Address::new(addr.container, *child);
            let header = self.metabase.head(&child_addr, false)?;
            let previous = header.split.as_ref().and_then(|s| s.previous);
            by_previous.insert(previous, header);
        }

        let mut payload = BytesMut::with_capacity(parent.payload_size as usize);
        let mut cursor = None;
        while let Some(part) = by_previous.remove(&cursor) {
            let part_addr = Address::new(addr.container, part.id);
            let blob_ref = self.metabase.blob_ref(&part_addr)?;
            let obj = self.blobstore.get(&part_addr, blob_ref)?;
            payload.extend_from_slice(&obj.payload);
            cursor = Some(part.id);
        }

        if payload.len() as u64 != parent.payload_size {
            warn!(
                %addr,
                assembled = payload.len(),
                expected = parent.payload_size,
                "assembled payload size mismatch"
            );
        }

        Ok(Object::new(parent, payload.freeze()))
    }
}

fn slice_payload(obj: &Object, offset: u64, length: u64) -> Result<Bytes> {
    let end = offset.checked_add(length).ok_or(Error::OutOfRange)?;
    if end > obj.header.payload_size {
        return Err(Error::OutOfRange);
    }
    Ok(obj.payload.slice(offset as usize..end as usize))
}
