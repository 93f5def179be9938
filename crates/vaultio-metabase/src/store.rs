//! Put / get / head / exists.

use crate::db::{
    decode_blob_ref, encode_blob_ref, encode_header, encode_id_list, Metabase,
};
use crate::tables::{
    self, ATTR, GRAVEYARD, LOCKERS, PARENT, PRIMARY, ROOT, SMALL, STORAGE_GROUP, TOMBSTONE,
};
use crate::db::decode_id_list;
use redb::{ReadableTable, TableDefinition};
use tracing::debug;
use vaultio_blobstore::BlobRef;
use vaultio_core::{
    Address, Error, Object, ObjectHeader, ObjectId, ObjectType, Result, SplitInfo,
};

/// Header table an object type maps to.
pub(crate) fn header_table(object_type: ObjectType) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match object_type {
        ObjectType::Regular => PRIMARY,
        ObjectType::Tombstone => TOMBSTONE,
        ObjectType::StorageGroup => STORAGE_GROUP,
        ObjectType::Lock => LOCKERS,
    }
}

impl Metabase {
    /// Index a stored object.
    ///
    /// Inserts the header into the table matching the object type, records
    /// the blob back-reference, and updates the root, parent, and attribute
    /// indexes. Returns `AlreadyRemoved` without mutation when the address is
    /// buried in the graveyard. Re-putting the same object is idempotent.
    pub fn put(&self, obj: &Object, blob_ref: BlobRef) -> Result<()> {
        let addr = obj.address();
        let key = tables::addr_key(&addr);
        let header = &obj.header;

        let wtx = self.db.begin_write()?;
        {
            let graveyard = wtx.open_table(GRAVEYARD)?;
            if graveyard.get(key.as_slice())?.is_some() {
                return Err(Error::AlreadyRemoved);
            }
            drop(graveyard);

            let mut table = wtx.open_table(header_table(header.object_type))?;
            table.insert(key.as_slice(), encode_header(header)?.as_slice())?;
            drop(table);

            let mut small = wtx.open_table(SMALL)?;
            small.insert(key.as_slice(), encode_blob_ref(&blob_ref)?.as_slice())?;
            drop(small);

            if header.is_root() {
                let mut root = wtx.open_table(ROOT)?;
                root.insert(key.as_slice(), tables::EMPTY_VALUE)?;
            }

            let mut attr = wtx.open_table(ATTR)?;
            for a in &header.attributes {
                let akey = tables::attr_key(&header.container, &a.key, &a.value, &header.id)?;
                attr.insert(akey.as_slice(), tables::EMPTY_VALUE)?;
            }
            drop(attr);

            if let Some(parent_id) = header.parent_id() {
                let parent_addr = Address::new(header.container, parent_id);
                let pkey = tables::addr_key(&parent_addr);

                let mut parent = wtx.open_table(PARENT)?;
                let mut children = match parent.get(pkey.as_slice())? {
                    Some(v) => decode_id_list(v.value())?,
                    None => Vec::new(),
                };
                if !children.contains(&header.id) {
                    children.push(header.id);
                }
                parent.insert(pkey.as_slice(), encode_id_list(&children)?.as_slice())?;
                drop(parent);

                // The inline parent header makes the virtual object
                // discoverable through root and attribute indexes.
                if let Some(parent_header) = header.parent() {
                    if parent_header.is_root() {
                        let mut root = wtx.open_table(ROOT)?;
                        root.insert(pkey.as_slice(), tables::EMPTY_VALUE)?;
                    }
                    let mut attr = wtx.open_table(ATTR)?;
                    for a in &parent_header.attributes {
                        let akey = tables::attr_key(
                            &parent_header.container,
                            &a.key,
                            &a.value,
                            &parent_header.id,
                        )?;
                        attr.insert(akey.as_slice(), tables::EMPTY_VALUE)?;
                    }
                }
            }
        }
        wtx.commit()?;

        debug!(%addr, "metabase PUT");
        Ok(())
    }

    /// Read a header-only object.
    ///
    /// A direct index hit wins. When only children of `addr` are known, the
    /// call returns the reconstructed parent, or a [`SplitInfo`] error when
    /// `raw` is set.
    pub fn get(&self, addr: &Address, raw: bool) -> Result<Object> {
        let rtx = self.db.begin_read()?;

        if Self::graveyard_record(&rtx, addr)?.is_some() {
            return Err(Error::AlreadyRemoved);
        }

        if let Some(header) = Self::phy_header(&rtx, addr)? {
            return Ok(Object::new(header, Default::default()));
        }

        let children = Self::child_list(&rtx, addr)?;
        let Some(last) = children.last() else {
            return Err(Error::NotFound);
        };

        let child_addr = Address::new(addr.container, *last);
        let Some(child) = Self::phy_header(&rtx, &child_addr)? else {
            return Err(Error::NotFound);
        };

        if raw {
            return Err(Error::Split(split_info_of(&child)));
        }

        match child.parent() {
            Some(parent) => Ok(Object::new(parent.clone(), Default::default())),
            None => Err(Error::NotFound),
        }
    }

    /// Read a header, payload elided. Split semantics as [`Metabase::get`].
    pub fn head(&self, addr: &Address, raw: bool) -> Result<ObjectHeader> {
        self.get(addr, raw).map(|obj| obj.header)
    }

    /// Whether the address is known to any index.
    ///
    /// Returns `AlreadyRemoved` when the graveyard holds the address.
    pub fn exists(&self, addr: &Address) -> Result<bool> {
        let rtx = self.db.begin_read()?;

        if Self::graveyard_record(&rtx, addr)?.is_some() {
            return Err(Error::AlreadyRemoved);
        }

        if Self::phy_header(&rtx, addr)?.is_some() {
            return Ok(true);
        }

        Ok(!Self::child_list(&rtx, addr)?.is_empty())
    }

    /// Blob back-reference recorded for the address, if any.
    pub fn blob_ref(&self, addr: &Address) -> Result<Option<BlobRef>> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(SMALL)?;
        match table.get(tables::addr_key(addr).as_slice())? {
            Some(v) => Ok(Some(decode_blob_ref(v.value())?)),
            None => Ok(None),
        }
    }

    /// Known children of a virtual parent, in insertion order.
    pub fn children(&self, addr: &Address) -> Result<Vec<ObjectId>> {
        let rtx = self.db.begin_read()?;
        Self::child_list(&rtx, addr)
    }
}

/// Split info derived from one known child.
pub(crate) fn split_info_of(child: &ObjectHeader) -> SplitInfo {
    let mut info = SplitInfo {
        split_id: child.split.as_ref().and_then(|s| s.split_id),
        ..Default::default()
    };

    let is_link = child
        .split
        .as_ref()
        .is_some_and(|s| !s.children.is_empty());
    if is_link {
        info.link = Some(child.id);
    } else {
        info.last_part = Some(child.id);
    }
    info
}
