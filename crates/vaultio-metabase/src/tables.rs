//! Redb table definitions and composite key builders.
//!
//! Containers are scoped by key prefix rather than per-container tables:
//! every key starts with the 32-byte container id, so a prefix range scan
//! visits exactly one container.

use redb::TableDefinition;
use vaultio_core::{Address, ContainerId, Error, ObjectId, Result};

/// Regular object headers: cid ‖ oid → header JSON.
pub const PRIMARY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("primary");
/// Tombstone object headers: cid ‖ oid → header JSON.
pub const TOMBSTONE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tombstone");
/// Storage-group object headers: cid ‖ oid → header JSON.
pub const STORAGE_GROUP: TableDefinition<&[u8], &[u8]> = TableDefinition::new("storage_group");
/// Lock object headers: cid ‖ oid → header JSON.
pub const LOCKERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("lockers");
/// Virtual parents: cid ‖ parent oid → JSON list of child oids.
pub const PARENT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("parent");
/// Top-level user objects: cid ‖ oid → empty.
pub const ROOT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("root");
/// Blob back-references: cid ‖ oid → JSON BlobRef.
pub const SMALL: TableDefinition<&[u8], &[u8]> = TableDefinition::new("small");
/// Inhumed addresses: cid ‖ oid → tombstone address bytes, empty = GC mark.
pub const GRAVEYARD: TableDefinition<&[u8], &[u8]> = TableDefinition::new("graveyard");
/// Relocation queue: cid ‖ oid → empty.
pub const TO_MOVE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("to_move");
/// Attribute index: cid ‖ len ‖ name ‖ len ‖ value ‖ oid → empty.
pub const ATTR: TableDefinition<&[u8], &[u8]> = TableDefinition::new("attr");
/// Lock targets: cid ‖ oid → JSON list of locker oids.
pub const LOCKED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("locked");

/// Marker value for presence-only tables.
pub(crate) const EMPTY_VALUE: &[u8] = &[];

/// Every table, in reset order.
pub const ALL_TABLES: [TableDefinition<&[u8], &[u8]>; 11] = [
    PRIMARY,
    TOMBSTONE,
    STORAGE_GROUP,
    LOCKERS,
    PARENT,
    ROOT,
    SMALL,
    GRAVEYARD,
    TO_MOVE,
    ATTR,
    LOCKED,
];

/// The four header tables, in list order.
pub const HEADER_TABLES: [TableDefinition<&[u8], &[u8]>; 4] =
    [PRIMARY, TOMBSTONE, STORAGE_GROUP, LOCKERS];

/// cid ‖ oid key of an address.
#[must_use]
pub fn addr_key(addr: &Address) -> [u8; Address::SIZE] {
    addr.to_bytes()
}

/// cid ‖ oid key from parts.
#[must_use]
pub fn cid_oid_key(cid: &ContainerId, oid: &ObjectId) -> [u8; Address::SIZE] {
    Address::new(*cid, *oid).to_bytes()
}

/// Parse a cid ‖ oid key back into an address.
pub fn parse_addr_key(key: &[u8]) -> Result<Address> {
    Address::from_bytes(key).map_err(|e| Error::corrupted(format!("bad address key: {e}")))
}

/// Attribute index key: cid ‖ u16 len ‖ name ‖ u16 len ‖ value ‖ oid.
///
/// Lengths are big-endian so lexicographic key order groups by (container,
/// name, value).
pub fn attr_key(cid: &ContainerId, name: &str, value: &str, oid: &ObjectId) -> Result<Vec<u8>> {
    let mut key = attr_value_prefix(cid, name, value)?;
    key.extend_from_slice(oid.as_bytes());
    Ok(key)
}

/// Prefix of every attribute key for (container, name).
pub fn attr_name_prefix(cid: &ContainerId, name: &str) -> Result<Vec<u8>> {
    let len: u16 = name
        .len()
        .try_into()
        .map_err(|_| Error::invalid_argument("attribute name too long"))?;

    let mut key = Vec::with_capacity(ContainerId::SIZE + 2 + name.len());
    key.extend_from_slice(cid.as_bytes());
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(name.as_bytes());
    Ok(key)
}

/// Prefix of every attribute key for (container, name, value).
pub fn attr_value_prefix(cid: &ContainerId, name: &str, value: &str) -> Result<Vec<u8>> {
    let len: u16 = value
        .len()
        .try_into()
        .map_err(|_| Error::invalid_argument("attribute value too long"))?;

    let mut key = attr_name_prefix(cid, name)?;
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(value.as_bytes());
    Ok(key)
}

/// Decoded attribute index key.
pub struct AttrKey {
    pub container: ContainerId,
    pub name: String,
    pub value: String,
    pub object: ObjectId,
}

/// Parse an attribute index key.
pub fn parse_attr_key(key: &[u8]) -> Result<AttrKey> {
    let bad = || Error::corrupted("bad attribute key");

    if key.len() < ContainerId::SIZE + 2 {
        return Err(bad());
    }
    let container =
        ContainerId::from_slice(&key[..ContainerId::SIZE]).map_err(|_| bad())?;
    let mut rest = &key[ContainerId::SIZE..];

    let name_len = u16::from_be_bytes(rest[..2].try_into().unwrap()) as usize;
    rest = &rest[2..];
    if rest.len() < name_len + 2 {
        return Err(bad());
    }
    let name = std::str::from_utf8(&rest[..name_len])
        .map_err(|_| bad())?
        .to_string();
    rest = &rest[name_len..];

    let value_len = u16::from_be_bytes(rest[..2].try_into().unwrap()) as usize;
    rest = &rest[2..];
    if rest.len() != value_len + ObjectId::SIZE {
        return Err(bad());
    }
    let value = std::str::from_utf8(&rest[..value_len])
        .map_err(|_| bad())?
        .to_string();
    let object = ObjectId::from_slice(&rest[value_len..]).map_err(|_| bad())?;

    Ok(AttrKey {
        container,
        name,
        value,
        object,
    })
}

/// End bound of a prefix range: the prefix with its last byte incremented
/// (with carry). Returns `None` when the prefix is all 0xFF (scan unbounded).
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}
