//! Physical removal of index records.

use crate::db::{decode_header, decode_id_list, encode_id_list, Metabase};
use crate::store::header_table;
use crate::tables::{self, ATTR, GRAVEYARD, HEADER_TABLES, PARENT, ROOT, SMALL, TO_MOVE};
use redb::{ReadableTable, WriteTransaction};
use std::collections::HashMap;
use tracing::debug;
use vaultio_core::{Address, ObjectHeader, Result};

/// Per-parent reference counter seeded with the known child count.
///
/// `cur == all` after a batch means every known child was deleted in it, so
/// the parent record goes too.
struct RefEntry {
    all: usize,
    cur: usize,
    header: Option<ObjectHeader>,
}

impl Metabase {
    /// Physically remove index records for the given addresses.
    ///
    /// Children decrement their parent's logical reference count; a parent
    /// whose every known child was deleted in this batch is removed as well.
    /// Missing rows are skipped, index removal is best-effort.
    pub fn delete(&self, addrs: &[Address]) -> Result<()> {
        let wtx = self.db.begin_write()?;
        {
            let mut ref_counter: HashMap<Address, RefEntry> = HashMap::with_capacity(addrs.len());

            for addr in addrs {
                delete_single(&wtx, addr, &mut ref_counter)?;
            }

            for (parent_addr, entry) in ref_counter {
                if entry.cur == entry.all {
                    delete_parent_record(&wtx, &parent_addr, entry.header.as_ref())?;
                }
            }
        }
        wtx.commit()?;

        for addr in addrs {
            debug!(%addr, "metabase DELETE");
        }
        Ok(())
    }
}

fn delete_single(
    wtx: &WriteTransaction,
    addr: &Address,
    ref_counter: &mut HashMap<Address, RefEntry>,
) -> Result<()> {
    let key = tables::addr_key(addr);

    let mut graveyard = wtx.open_table(GRAVEYARD)?;
    graveyard.remove(key.as_slice())?;
    drop(graveyard);

    // Work only with physically stored objects; a virtual-only address has
    // nothing of its own to remove.
    let mut header = None;
    for def in HEADER_TABLES {
        let table = wtx.open_table(def)?;
        let got = table.get(key.as_slice())?;
        if let Some(v) = got {
            header = Some(decode_header(v.value())?);
            break;
        }
    }
    let Some(header) = header else {
        return Ok(());
    };

    if let Some(parent_id) = header.parent_id() {
        let parent_addr = Address::new(header.container, parent_id);
        let entry = match ref_counter.entry(parent_addr) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let all = parent_list_len(wtx, &parent_addr)?;
                e.insert(RefEntry {
                    all,
                    cur: 0,
                    header: header.parent().cloned(),
                })
            }
        };
        entry.cur += 1;
    }

    delete_object_indexes(wtx, &header, false)
}

/// Number of known children of a parent, before this batch touches the list.
fn parent_list_len(wtx: &WriteTransaction, parent_addr: &Address) -> Result<usize> {
    let table = wtx.open_table(PARENT)?;
    let got = table.get(tables::addr_key(parent_addr).as_slice())?;
    match got {
        Some(v) => Ok(decode_id_list(v.value())?.len()),
        None => Ok(0),
    }
}

fn delete_parent_record(
    wtx: &WriteTransaction,
    parent_addr: &Address,
    header: Option<&ObjectHeader>,
) -> Result<()> {
    if let Some(header) = header {
        delete_object_indexes(wtx, header, true)?;
    } else {
        // No inline header survived; still drop the bare records.
        let key = tables::addr_key(parent_addr);
        let mut parent = wtx.open_table(PARENT)?;
        parent.remove(key.as_slice())?;
        drop(parent);
        let mut root = wtx.open_table(ROOT)?;
        root.remove(key.as_slice())?;
    }
    Ok(())
}

/// Remove every index record of one object.
///
/// `is_parent` switches the unique record between the type table and the
/// parent table; everything else is shared.
fn delete_object_indexes(
    wtx: &WriteTransaction,
    header: &ObjectHeader,
    is_parent: bool,
) -> Result<()> {
    let addr = header.address();
    let key = tables::addr_key(&addr);

    if is_parent {
        let mut parent = wtx.open_table(PARENT)?;
        parent.remove(key.as_slice())?;
    } else {
        let mut table = wtx.open_table(header_table(header.object_type))?;
        table.remove(key.as_slice())?;
    }

    let mut small = wtx.open_table(SMALL)?;
    small.remove(key.as_slice())?;
    drop(small);

    let mut root = wtx.open_table(ROOT)?;
    root.remove(key.as_slice())?;
    drop(root);

    let mut to_move = wtx.open_table(TO_MOVE)?;
    to_move.remove(key.as_slice())?;
    drop(to_move);

    let mut attr = wtx.open_table(ATTR)?;
    for a in &header.attributes {
        let akey = tables::attr_key(&header.container, &a.key, &a.value, &header.id)?;
        attr.remove(akey.as_slice())?;
    }
    drop(attr);

    // Drop this object from its parent's child list.
    if !is_parent {
        if let Some(parent_id) = header.parent_id() {
            let pkey = tables::cid_oid_key(&header.container, &parent_id);
            let mut parent = wtx.open_table(PARENT)?;
            let got = parent.get(pkey.as_slice())?.map(|v| v.value().to_vec());
            if let Some(v) = got {
                let mut children = decode_id_list(&v)?;
                children.retain(|c| *c != header.id);
                if children.is_empty() {
                    parent.remove(pkey.as_slice())?;
                } else {
                    parent.insert(pkey.as_slice(), encode_id_list(&children)?.as_slice())?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{child_of, sample_object, temp_metabase};
    use vaultio_blobstore::BlobRef;
    use vaultio_core::{Error, ObjectType};

    #[test]
    fn test_delete_removes_all_indexes() {
        let (_dir, meta) = temp_metabase();
        let obj = sample_object(ObjectType::Regular);
        meta.put(&obj, BlobRef::Tree).unwrap();

        meta.delete(&[obj.address()]).unwrap();

        assert!(!meta.exists(&obj.address()).unwrap());
        assert_eq!(meta.blob_ref(&obj.address()).unwrap(), None);
        assert!(matches!(
            meta.get(&obj.address(), false),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_delete_clears_graveyard_record() {
        let (_dir, meta) = temp_metabase();
        let obj = sample_object(ObjectType::Regular);
        meta.put(&obj, BlobRef::Tree).unwrap();
        meta.inhume(None, &[obj.address()]).unwrap();

        meta.delete(&[obj.address()]).unwrap();

        // no graveyard record left, the address is simply unknown now
        assert!(!meta.exists(&obj.address()).unwrap());
    }

    #[test]
    fn test_deleting_last_child_removes_parent() {
        let (_dir, meta) = temp_metabase();
        let parent = sample_object(ObjectType::Regular);
        let a = child_of(&parent, None);
        let b = child_of(&parent, Some(a.header.id));

        meta.put(&a, BlobRef::Tree).unwrap();
        meta.put(&b, BlobRef::Tree).unwrap();

        // deleting one child keeps the parent reachable
        meta.delete(&[a.address()]).unwrap();
        assert!(meta.exists(&parent.address()).unwrap());
        assert_eq!(
            meta.head(&parent.address(), false).unwrap(),
            parent.header
        );

        // deleting the last child removes the parent record too
        meta.delete(&[b.address()]).unwrap();
        assert!(!meta.exists(&parent.address()).unwrap());
    }

    #[test]
    fn test_batch_delete_of_siblings_removes_parent_once() {
        let (_dir, meta) = temp_metabase();
        let parent = sample_object(ObjectType::Regular);
        let a = child_of(&parent, None);
        let b = child_of(&parent, Some(a.header.id));
        let c = child_of(&parent, Some(b.header.id));

        for obj in [&a, &b, &c] {
            meta.put(obj, BlobRef::Tree).unwrap();
        }

        meta.delete(&[a.address(), b.address(), c.address()]).unwrap();

        assert!(!meta.exists(&parent.address()).unwrap());
        assert!(meta.children(&parent.address()).unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let (_dir, meta) = temp_metabase();
        let obj = sample_object(ObjectType::Regular);
        meta.delete(&[obj.address()]).unwrap();
    }
}
