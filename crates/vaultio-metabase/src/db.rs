//! Database handle and shared codec helpers.

use crate::tables::{self, ALL_TABLES, GRAVEYARD, HEADER_TABLES, PARENT};
use redb::{Database, ReadTransaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vaultio_blobstore::BlobRef;
use vaultio_core::{Address, Error, ObjectHeader, ObjectId, Result};

/// Index-only ordered store of one shard.
///
/// All mutating operations run inside a single write transaction and are
/// all-or-nothing.
pub struct Metabase {
    pub(crate) db: Database,
    path: PathBuf,
}

impl Metabase {
    /// Open (or create) the metabase at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let db = Database::create(&path)?;
        let wtx = db.begin_write()?;
        for def in ALL_TABLES {
            wtx.open_table(def)?;
        }
        wtx.commit()?;

        debug!(path = %path.display(), "opened metabase");
        Ok(Self { db, path })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wipe every table. Used only before a refill.
    pub fn reset(&self) -> Result<()> {
        let wtx = self.db.begin_write()?;
        for def in ALL_TABLES {
            wtx.delete_table(def)?;
            wtx.open_table(def)?;
        }
        wtx.commit()?;

        info!(path = %self.path.display(), "metabase reset");
        Ok(())
    }

    /// Graveyard record for an address within a read transaction.
    ///
    /// `None` — not buried; `Some(None)` — GC mark; `Some(Some(a))` — buried
    /// under tombstone `a`.
    pub(crate) fn graveyard_record(
        rtx: &ReadTransaction,
        addr: &Address,
    ) -> Result<Option<Option<Address>>> {
        let table = rtx.open_table(GRAVEYARD)?;
        let Some(value) = table.get(tables::addr_key(addr).as_slice())? else {
            return Ok(None);
        };
        Ok(Some(decode_grave_value(value.value())?))
    }

    /// Load a physically stored header by probing the four header tables.
    pub(crate) fn phy_header(
        rtx: &ReadTransaction,
        addr: &Address,
    ) -> Result<Option<ObjectHeader>> {
        let key = tables::addr_key(addr);
        for def in HEADER_TABLES {
            let table = rtx.open_table(def)?;
            if let Some(value) = table.get(key.as_slice())? {
                return Ok(Some(decode_header(value.value())?));
            }
        }
        Ok(None)
    }

    /// Child list of a virtual parent, empty when unknown.
    pub(crate) fn child_list(rtx: &ReadTransaction, addr: &Address) -> Result<Vec<ObjectId>> {
        let table = rtx.open_table(PARENT)?;
        match table.get(tables::addr_key(addr).as_slice())? {
            Some(value) => decode_id_list(value.value()),
            None => Ok(Vec::new()),
        }
    }
}

pub(crate) fn encode_header(header: &ObjectHeader) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(header)?)
}

pub(crate) fn decode_header(data: &[u8]) -> Result<ObjectHeader> {
    serde_json::from_slice(data).map_err(|e| Error::corrupted(format!("bad header record: {e}")))
}

pub(crate) fn encode_id_list(list: &[ObjectId]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(list)?)
}

pub(crate) fn decode_id_list(data: &[u8]) -> Result<Vec<ObjectId>> {
    serde_json::from_slice(data).map_err(|e| Error::corrupted(format!("bad id list record: {e}")))
}

pub(crate) fn encode_blob_ref(blob_ref: &BlobRef) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(blob_ref)?)
}

pub(crate) fn decode_blob_ref(data: &[u8]) -> Result<BlobRef> {
    serde_json::from_slice(data).map_err(|e| Error::corrupted(format!("bad blob ref record: {e}")))
}

/// Graveyard values: empty = GC mark, otherwise a tombstone address.
pub(crate) fn decode_grave_value(data: &[u8]) -> Result<Option<Address>> {
    if data.is_empty() {
        return Ok(None);
    }
    Address::from_bytes(data)
        .map(Some)
        .map_err(|e| Error::corrupted(format!("bad graveyard record: {e}")))
}
