//! GC helpers, relocation queue, and cursor-based listing.

use crate::db::{decode_grave_value, Metabase};
use crate::tables::{self, ATTR, GRAVEYARD, HEADER_TABLES, TO_MOVE};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Bound;
use tracing::debug;
use vaultio_core::{Address, ObjectType, Result, ATTR_EXPIRATION_EPOCH};

/// Opaque continuation token of [`Metabase::list_with_cursor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCursor {
    table: u8,
    key: Vec<u8>,
}

impl Metabase {
    /// Visit addresses whose expiration attribute is at or below `epoch`.
    ///
    /// The callback receives the object type so callers can separate expired
    /// regular objects from tombstones and locks. Virtual parents never
    /// surface here: only physically stored objects carry index rows in the
    /// header tables.
    pub fn iterate_expired<F>(&self, epoch: u64, mut f: F) -> Result<()>
    where
        F: FnMut(Address, ObjectType) -> Result<()>,
    {
        let rtx = self.db.begin_read()?;
        let attr = rtx.open_table(ATTR)?;

        for entry in attr.iter()? {
            let (key, _) = entry?;
            let Ok(parsed) = tables::parse_attr_key(key.value()) else {
                continue;
            };
            if parsed.name != ATTR_EXPIRATION_EPOCH {
                continue;
            }
            let Ok(expires_at) = parsed.value.parse::<u64>() else {
                continue;
            };
            if expires_at > epoch {
                continue;
            }

            let addr = Address::new(parsed.container, parsed.object);
            let Some(header) = Self::phy_header(&rtx, &addr)? else {
                continue;
            };
            f(addr, header.object_type)?;
        }
        Ok(())
    }

    /// Visit every graveyard record.
    ///
    /// The callback receives the buried address and the burying tombstone
    /// address (`None` for bare GC marks).
    pub fn iterate_graveyard<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Address, Option<Address>) -> Result<()>,
    {
        let rtx = self.db.begin_read()?;
        let graveyard = rtx.open_table(GRAVEYARD)?;
        for entry in graveyard.iter()? {
            let (key, value) = entry?;
            let addr = tables::parse_addr_key(key.value())?;
            let tomb = decode_grave_value(value.value())?;
            f(addr, tomb)?;
        }
        Ok(())
    }

    /// Visit graveyard records buried under one of the given tombstones.
    pub fn iterate_covered_by_tombstones<F>(
        &self,
        tombstones: &HashSet<Address>,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(Address) -> Result<()>,
    {
        self.iterate_graveyard(|addr, tomb| {
            if tomb.is_some_and(|t| tombstones.contains(&t)) {
                f(addr)?;
            }
            Ok(())
        })
    }

    /// Schedule an address for relocation to another shard.
    pub fn to_move_it(&self, addr: &Address) -> Result<()> {
        let wtx = self.db.begin_write()?;
        {
            let mut to_move = wtx.open_table(TO_MOVE)?;
            to_move.insert(tables::addr_key(addr).as_slice(), tables::EMPTY_VALUE)?;
        }
        wtx.commit()?;

        debug!(%addr, "metabase TO-MOVE");
        Ok(())
    }

    /// Drop a relocation record after the move completed (or was abandoned).
    pub fn drop_move(&self, addr: &Address) -> Result<()> {
        let wtx = self.db.begin_write()?;
        {
            let mut to_move = wtx.open_table(TO_MOVE)?;
            to_move.remove(tables::addr_key(addr).as_slice())?;
        }
        wtx.commit()?;
        Ok(())
    }

    /// Visit every address scheduled for relocation.
    pub fn iterate_to_move<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Address) -> Result<()>,
    {
        let rtx = self.db.begin_read()?;
        let to_move = rtx.open_table(TO_MOVE)?;
        for entry in to_move.iter()? {
            let (key, _) = entry?;
            f(tables::parse_addr_key(key.value())?)?;
        }
        Ok(())
    }

    /// Page through physically stored, non-inhumed addresses.
    ///
    /// Returns up to `limit` addresses and a cursor to continue from, or
    /// `None` when the listing is exhausted.
    pub fn list_with_cursor(
        &self,
        limit: usize,
        cursor: Option<&ListCursor>,
    ) -> Result<(Vec<Address>, Option<ListCursor>)> {
        if limit == 0 {
            return Ok((Vec::new(), cursor.cloned()));
        }

        let rtx = self.db.begin_read()?;
        let mut out = Vec::with_capacity(limit);

        let (start_table, mut start_key) = match cursor {
            Some(c) => (c.table as usize, Some(c.key.clone())),
            None => (0, None),
        };

        for (idx, def) in HEADER_TABLES.into_iter().enumerate().skip(start_table) {
            let table = rtx.open_table(def)?;
            let range = match start_key.take() {
                Some(key) => table.range::<&[u8]>((
                    Bound::Excluded(key.as_slice()),
                    Bound::Unbounded,
                ))?,
                None => table.iter()?,
            };

            for entry in range {
                let (key, _) = entry?;
                let addr = tables::parse_addr_key(key.value())?;

                if Self::graveyard_record(&rtx, &addr)?.is_some() {
                    continue;
                }

                out.push(addr);
                if out.len() == limit {
                    return Ok((
                        out,
                        Some(ListCursor {
                            table: idx as u8,
                            key: key.value().to_vec(),
                        }),
                    ));
                }
            }
        }

        Ok((out, None))
    }
}
