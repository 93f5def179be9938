//! Graveyard and lock bookkeeping.

use crate::db::{decode_id_list, encode_id_list, Metabase};
use crate::tables::{self, GRAVEYARD, LOCKED};
use redb::ReadableTable;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use vaultio_core::{Address, ContainerId, Error, ObjectId, Result};

impl Metabase {
    /// Mark addresses as logically removed.
    ///
    /// `tombstone` is the burying tombstone's address; `None` buries with a
    /// bare GC mark (expired objects). Fails with `ObjectLocked` — leaving
    /// the graveyard untouched — when any member holds an unexpired locker.
    pub fn inhume(&self, tombstone: Option<&Address>, addrs: &[Address]) -> Result<()> {
        let wtx = self.db.begin_write()?;
        {
            let locked = wtx.open_table(LOCKED)?;
            for addr in addrs {
                if locked.get(tables::addr_key(addr).as_slice())?.is_some() {
                    return Err(Error::ObjectLocked);
                }
            }
            drop(locked);

            let value: Vec<u8> = match tombstone {
                Some(tomb) => tomb.to_bytes().to_vec(),
                None => Vec::new(),
            };

            let mut graveyard = wtx.open_table(GRAVEYARD)?;
            for addr in addrs {
                graveyard.insert(tables::addr_key(addr).as_slice(), value.as_slice())?;
            }
        }
        wtx.commit()?;

        for addr in addrs {
            debug!(%addr, "metabase INHUME");
        }
        Ok(())
    }

    /// Record `locker` as keeping each target alive.
    ///
    /// Targets live in the locker's container; a target may hold many
    /// lockers.
    pub fn lock(
        &self,
        container: &ContainerId,
        locker: ObjectId,
        targets: &[ObjectId],
    ) -> Result<()> {
        if targets.is_empty() {
            return Err(Error::invalid_argument("empty lock target list"));
        }

        let wtx = self.db.begin_write()?;
        {
            let mut locked = wtx.open_table(LOCKED)?;
            for target in targets {
                let key = tables::cid_oid_key(container, target);
                let mut lockers = match locked.get(key.as_slice())? {
                    Some(v) => decode_id_list(v.value())?,
                    None => Vec::new(),
                };
                if !lockers.contains(&locker) {
                    lockers.push(locker);
                }
                locked.insert(key.as_slice(), encode_id_list(&lockers)?.as_slice())?;
            }
        }
        wtx.commit()?;

        debug!(%container, %locker, targets = targets.len(), "metabase LOCK");
        Ok(())
    }

    /// Whether the address currently holds any locker.
    pub fn is_locked(&self, addr: &Address) -> Result<bool> {
        let rtx = self.db.begin_read()?;
        let locked = rtx.open_table(LOCKED)?;
        Ok(locked.get(tables::addr_key(addr).as_slice())?.is_some())
    }

    /// Release every lock held by the given lockers.
    ///
    /// Returns the addresses that no longer hold any locker and so re-enter
    /// normal GC consideration.
    pub fn free_locked_by(&self, lockers: &[Address]) -> Result<Vec<Address>> {
        let mut by_container: HashMap<ContainerId, HashSet<ObjectId>> = HashMap::new();
        for locker in lockers {
            by_container
                .entry(locker.container)
                .or_default()
                .insert(locker.object);
        }

        let mut unlocked = Vec::new();

        let wtx = self.db.begin_write()?;
        {
            let mut locked = wtx.open_table(LOCKED)?;

            for (container, locker_ids) in &by_container {
                // collect affected entries first, then rewrite
                let mut touched: Vec<(Vec<u8>, Vec<ObjectId>)> = Vec::new();

                let start = container.as_bytes().to_vec();
                let end = tables::prefix_end(container.as_bytes());
                let range = match &end {
                    Some(end) => locked.range(start.as_slice()..end.as_slice())?,
                    None => locked.range(start.as_slice()..)?,
                };

                for entry in range {
                    let (key, value) = entry?;
                    let list = decode_id_list(value.value())?;
                    if list.iter().any(|id| locker_ids.contains(id)) {
                        touched.push((key.value().to_vec(), list));
                    }
                }

                for (key, mut list) in touched {
                    list.retain(|id| !locker_ids.contains(id));
                    if list.is_empty() {
                        locked.remove(key.as_slice())?;
                        unlocked.push(tables::parse_addr_key(&key)?);
                    } else {
                        locked.insert(key.as_slice(), encode_id_list(&list)?.as_slice())?;
                    }
                }
            }
        }
        wtx.commit()?;

        Ok(unlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{sample_object, sample_object_in, temp_metabase};
    use vaultio_blobstore::BlobRef;
    use vaultio_core::ObjectType;

    #[test]
    fn test_inhume_then_already_removed() {
        let (_dir, meta) = temp_metabase();
        let obj = sample_object(ObjectType::Regular);
        let tomb = sample_object_in(obj.header.container, ObjectType::Tombstone);

        meta.put(&obj, BlobRef::Tree).unwrap();
        meta.inhume(Some(&tomb.address()), &[obj.address()]).unwrap();

        assert!(matches!(
            meta.exists(&obj.address()),
            Err(Error::AlreadyRemoved)
        ));
        assert!(matches!(
            meta.get(&obj.address(), false),
            Err(Error::AlreadyRemoved)
        ));
        assert!(matches!(
            meta.put(&obj, BlobRef::Tree),
            Err(Error::AlreadyRemoved)
        ));
    }

    #[test]
    fn test_inhume_buries_every_member() {
        let (_dir, meta) = temp_metabase();
        let tomb = sample_object(ObjectType::Tombstone);
        meta.put(&tomb, BlobRef::Tree).unwrap();

        // a member list naming the tombstone itself gets no special case
        meta.inhume(Some(&tomb.address()), &[tomb.address()]).unwrap();

        assert!(matches!(
            meta.exists(&tomb.address()),
            Err(Error::AlreadyRemoved)
        ));
    }

    #[test]
    fn test_lock_blocks_inhume() {
        let (_dir, meta) = temp_metabase();
        let obj = sample_object(ObjectType::Regular);
        let locker = sample_object_in(obj.header.container, ObjectType::Lock);
        let tomb = sample_object_in(obj.header.container, ObjectType::Tombstone);

        meta.put(&obj, BlobRef::Tree).unwrap();
        meta.lock(&obj.header.container, locker.header.id, &[obj.header.id])
            .unwrap();

        assert!(matches!(
            meta.inhume(Some(&tomb.address()), &[obj.address()]),
            Err(Error::ObjectLocked)
        ));

        // the failed inhume must not leave graveyard traces
        assert!(meta.exists(&obj.address()).unwrap());
    }

    #[test]
    fn test_free_locked_by_releases_targets() {
        let (_dir, meta) = temp_metabase();
        let obj = sample_object(ObjectType::Regular);
        let cid = obj.header.container;
        let locker_a = sample_object_in(cid, ObjectType::Lock);
        let locker_b = sample_object_in(cid, ObjectType::Lock);

        meta.put(&obj, BlobRef::Tree).unwrap();
        meta.lock(&cid, locker_a.header.id, &[obj.header.id]).unwrap();
        meta.lock(&cid, locker_b.header.id, &[obj.header.id]).unwrap();

        // dropping one locker keeps the target locked
        let freed = meta.free_locked_by(&[locker_a.address()]).unwrap();
        assert!(freed.is_empty());
        assert!(meta.is_locked(&obj.address()).unwrap());

        // dropping the last locker releases the target
        let freed = meta.free_locked_by(&[locker_b.address()]).unwrap();
        assert_eq!(freed, vec![obj.address()]);
        assert!(!meta.is_locked(&obj.address()).unwrap());

        // and the target can be inhumed now
        meta.inhume(None, &[obj.address()]).unwrap();
        assert!(matches!(
            meta.exists(&obj.address()),
            Err(Error::AlreadyRemoved)
        ));
    }
}
