//! Composed blob store

use crate::pool::Pool;
use crate::tree::FileTree;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use vaultio_core::{Address, Error, Object, Result};

/// Blob store configuration.
#[derive(Clone, Debug)]
pub struct BlobStoreConfig {
    /// Root directory (`pool/` and `tree/` live underneath).
    pub dir: PathBuf,
    /// Payloads up to this size go to the pool.
    pub small_size_limit: u64,
    /// File-tree directory depth.
    pub depth: usize,
    /// File-tree directory name width.
    pub width: usize,
    /// Number of pool buckets.
    pub pool_width: u16,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./blob"),
            small_size_limit: 128 * 1024,
            depth: 2,
            width: 2,
            pool_width: 4,
        }
    }
}

/// Back-reference to the sub-store holding an object.
///
/// Recorded in the metabase so later reads skip the probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobRef {
    /// Small-blob pool, with the bucket index.
    Pool { index: u16 },
    /// Large-blob file tree.
    Tree,
}

/// Payload persistence tier: pool for small objects, file tree for large.
pub struct BlobStore {
    pool: Pool,
    tree: FileTree,
    small_size_limit: u64,
}

impl BlobStore {
    /// Open (or create) the store described by `config`.
    pub fn open(config: &BlobStoreConfig) -> Result<Self> {
        let pool = Pool::open(&config.dir.join("pool"), config.pool_width.max(1))?;
        let tree = FileTree::open(&config.dir.join("tree"), config.depth, config.width)?;

        debug!(dir = %config.dir.display(), "opened blob store");
        Ok(Self {
            pool,
            tree,
            small_size_limit: config.small_size_limit,
        })
    }

    /// Persist an object, routing by payload size. Returns the back-reference.
    pub fn put(&self, obj: &Object) -> Result<BlobRef> {
        let addr = obj.address();
        let frame = obj.to_frame()?;

        let blob_ref = if obj.header.payload_size <= self.small_size_limit {
            let index = self.pool.put(&addr, &frame)?;
            BlobRef::Pool { index }
        } else {
            self.tree.put(&addr, &frame)?;
            BlobRef::Tree
        };

        debug!(%addr, ?blob_ref, "blobstore PUT");
        Ok(blob_ref)
    }

    /// Fetch an object. A known `blob_ref` gives a direct read; otherwise the
    /// pool is probed first, then the tree.
    pub fn get(&self, addr: &Address, blob_ref: Option<BlobRef>) -> Result<Object> {
        let frame = match blob_ref {
            Some(BlobRef::Pool { index }) => self.pool.get(addr, Some(index))?,
            Some(BlobRef::Tree) => self.tree.get(addr)?,
            None => match self.pool.get(addr, None) {
                Ok(frame) => frame,
                Err(Error::NotFound) => self.tree.get(addr)?,
                Err(e) => return Err(e),
            },
        };
        Object::from_frame(&frame)
    }

    /// Read `length` payload bytes starting at `offset`.
    pub fn get_range(
        &self,
        addr: &Address,
        offset: u64,
        length: u64,
        blob_ref: Option<BlobRef>,
    ) -> Result<Bytes> {
        let obj = self.get(addr, blob_ref)?;
        let end = offset
            .checked_add(length)
            .ok_or(Error::OutOfRange)?;
        if end > obj.header.payload_size {
            return Err(Error::OutOfRange);
        }
        Ok(obj.payload.slice(offset as usize..end as usize))
    }

    /// Remove an object. Returns `NotFound` if neither sub-store has it.
    pub fn delete(&self, addr: &Address, blob_ref: Option<BlobRef>) -> Result<()> {
        let res = match blob_ref {
            Some(BlobRef::Pool { index }) => self.pool.delete(addr, Some(index)),
            Some(BlobRef::Tree) => self.tree.delete(addr),
            None => match self.pool.delete(addr, None) {
                Err(Error::NotFound) => self.tree.delete(addr),
                other => other,
            },
        };
        if res.is_ok() {
            debug!(%addr, "blobstore DELETE");
        }
        res
    }

    /// Whether either sub-store holds the object.
    pub fn exists(&self, addr: &Address) -> Result<bool> {
        Ok(self.pool.exists(addr)? || self.tree.exists(addr)?)
    }

    /// Visit every stored object in unspecified order.
    ///
    /// Used by metabase refill and audits. Corrupt records are skipped by the
    /// sub-stores.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Object, BlobRef) -> Result<()>,
    {
        self.pool
            .iterate(|obj, index| f(obj, BlobRef::Pool { index }))?;
        self.tree.iterate(&mut |obj| f(obj, BlobRef::Tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultio_core::{Checksum, ContainerId, ObjectHeader, ObjectId, ObjectType, OwnerId};

    fn sample(payload_len: usize) -> Object {
        let payload = vec![0x5A; payload_len];
        let header = ObjectHeader {
            id: ObjectId::new(rand::random()),
            container: ContainerId::new(rand::random()),
            owner: OwnerId::new(rand::random()),
            object_type: ObjectType::Regular,
            payload_size: payload.len() as u64,
            payload_checksum: Checksum::compute(&payload),
            homomorphic_hash: None,
            creation_epoch: 1,
            attributes: Vec::new(),
            split: None,
            signature: None,
        };
        Object::new(header, payload.into())
    }

    fn open_store(dir: &std::path::Path) -> BlobStore {
        BlobStore::open(&BlobStoreConfig {
            dir: dir.to_path_buf(),
            small_size_limit: 1024,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_put_routes_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let small = sample(512);
        let large = sample(4096);

        assert!(matches!(
            store.put(&small).unwrap(),
            BlobRef::Pool { .. }
        ));
        assert_eq!(store.put(&large).unwrap(), BlobRef::Tree);

        // both retrievable without a ref (probe path)
        assert_eq!(store.get(&small.address(), None).unwrap(), small);
        assert_eq!(store.get(&large.address(), None).unwrap(), large);
    }

    #[test]
    fn test_get_range_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let obj = sample(100);
        let blob_ref = store.put(&obj).unwrap();

        let chunk = store
            .get_range(&obj.address(), 10, 20, Some(blob_ref))
            .unwrap();
        assert_eq!(chunk, obj.payload.slice(10..30));

        assert!(matches!(
            store.get_range(&obj.address(), 90, 11, Some(blob_ref)),
            Err(Error::OutOfRange)
        ));
        assert!(matches!(
            store.get_range(&obj.address(), u64::MAX, 1, Some(blob_ref)),
            Err(Error::OutOfRange)
        ));
    }

    #[test]
    fn test_delete_then_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let obj = sample(64);
        store.put(&obj).unwrap();
        store.delete(&obj.address(), None).unwrap();

        assert!(matches!(
            store.get(&obj.address(), None),
            Err(Error::NotFound)
        ));
        assert!(matches!(
            store.delete(&obj.address(), None),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_iterate_covers_both_substores() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let small = sample(100);
        let large = sample(10_000);
        store.put(&small).unwrap();
        store.put(&large).unwrap();

        let mut seen = Vec::new();
        store
            .iterate(|obj, blob_ref| {
                seen.push((obj.address(), blob_ref));
                Ok(())
            })
            .unwrap();

        seen.sort_by_key(|(a, _)| *a);
        let mut expect = vec![
            (small.address(), BlobRef::Pool { index: 0 }),
            (large.address(), BlobRef::Tree),
        ];
        expect.sort_by_key(|(a, _)| *a);

        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen.iter().map(|(a, _)| *a).collect::<Vec<_>>(),
            expect.iter().map(|(a, _)| *a).collect::<Vec<_>>()
        );
    }
}
