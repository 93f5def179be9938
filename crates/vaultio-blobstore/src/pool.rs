//! Small-blob pool
//!
//! A fixed set of key/value databases under `pool/`, one per bucket. The
//! bucket for an address is chosen by hashing the address, so lookups that
//! already know the [`super::BlobRef`] can skip the probe entirely.

use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vaultio_core::{Address, Error, Object, Result};

const BLOBS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blobs");

/// Bucketed pool of small-object databases.
pub struct Pool {
    buckets: Vec<Database>,
}

impl Pool {
    /// Open (or create) `width` bucket databases under `dir`.
    pub fn open(dir: &Path, width: u16) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut buckets = Vec::with_capacity(width as usize);
        for i in 0..width {
            let db = Database::create(bucket_path(dir, i))?;
            let wtx = db.begin_write()?;
            wtx.open_table(BLOBS)?;
            wtx.commit()?;
            buckets.push(db);
        }

        debug!(width, dir = %dir.display(), "opened blob pool");
        Ok(Self { buckets })
    }

    /// Bucket index an address maps to.
    #[must_use]
    pub fn bucket_of(&self, addr: &Address) -> u16 {
        (crc32c::crc32c(&addr.to_bytes()) % self.buckets.len() as u32) as u16
    }

    /// Store a frame; returns the bucket index it landed in.
    pub fn put(&self, addr: &Address, frame: &[u8]) -> Result<u16> {
        let index = self.bucket_of(addr);
        let wtx = self.buckets[index as usize].begin_write()?;
        wtx.open_table(BLOBS)?
            .insert(addr.to_bytes().as_slice(), frame)?;
        wtx.commit()?;
        Ok(index)
    }

    /// Fetch a frame from a known bucket, or probe the address's bucket.
    pub fn get(&self, addr: &Address, index: Option<u16>) -> Result<Vec<u8>> {
        let index = index.unwrap_or_else(|| self.bucket_of(addr));
        let db = self
            .buckets
            .get(index as usize)
            .ok_or_else(|| Error::invalid_argument(format!("pool bucket {index} out of range")))?;

        let rtx = db.begin_read()?;
        let table = rtx.open_table(BLOBS)?;
        match table.get(addr.to_bytes().as_slice())? {
            Some(v) => Ok(v.value().to_vec()),
            None => Err(Error::NotFound),
        }
    }

    /// Remove a frame. Returns `NotFound` if absent.
    pub fn delete(&self, addr: &Address, index: Option<u16>) -> Result<()> {
        let index = index.unwrap_or_else(|| self.bucket_of(addr));
        let db = self
            .buckets
            .get(index as usize)
            .ok_or_else(|| Error::invalid_argument(format!("pool bucket {index} out of range")))?;

        let wtx = db.begin_write()?;
        let removed = wtx
            .open_table(BLOBS)?
            .remove(addr.to_bytes().as_slice())?
            .is_some();
        wtx.commit()?;

        if removed {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Whether a frame for `addr` is present.
    pub fn exists(&self, addr: &Address) -> Result<bool> {
        let index = self.bucket_of(addr);
        let rtx = self.buckets[index as usize].begin_read()?;
        let table = rtx.open_table(BLOBS)?;
        Ok(table.get(addr.to_bytes().as_slice())?.is_some())
    }

    /// Visit every stored object. Corrupt frames are logged and skipped.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Object, u16) -> Result<()>,
    {
        for (index, db) in self.buckets.iter().enumerate() {
            let rtx = db.begin_read()?;
            let table = rtx.open_table(BLOBS)?;
            for entry in table.iter()? {
                let (key, value) = entry?;
                match Object::from_frame(value.value()) {
                    Ok(obj) => f(obj, index as u16)?,
                    Err(e) => {
                        warn!(bucket = index, key = ?key.value(), %e, "skipping corrupt pool record");
                    }
                }
            }
        }
        Ok(())
    }
}

fn bucket_path(dir: &Path, index: u16) -> PathBuf {
    dir.join(format!("{index:03}.db"))
}
