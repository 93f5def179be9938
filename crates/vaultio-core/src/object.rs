//! Object model and on-disk frame
//!
//! An object is an immutable header + payload bundle. At rest it is kept as
//! a single checksummed frame:
//!
//! ```text
//! +----------+---------+-------+------------+-------------+---------+--------+
//! |  magic   | version | flags | header_len | header JSON | payload | crc32c |
//! |  8 bytes |   u16   |  u16  |    u32     |  variable   | variable|  u32   |
//! +----------+---------+-------+------------+-------------+---------+--------+
//! ```
//!
//! The checksum covers header and payload bytes.

use crate::error::{Error, Result};
use crate::types::{
    Address, Attribute, ContainerId, ObjectId, ObjectType, OwnerId, ATTR_EXPIRATION_EPOCH,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Magic prefix of an object frame.
pub const FRAME_MAGIC: [u8; 8] = *b"VLTOBJ1\0";

/// Current frame format version.
const FRAME_VERSION: u16 = 1;

/// Fixed frame overhead: magic + version + flags + header_len + trailing crc.
const FRAME_OVERHEAD: usize = 8 + 2 + 2 + 4 + 4;

/// SHA-256 payload checksum.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Compute the checksum of `data`.
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Get the raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify `data` against this checksum.
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({self})")
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = Checksum;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a 64-character hex string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Checksum, E> {
                if v.len() != 64 {
                    return Err(de::Error::custom("checksum must be 32 bytes of hex"));
                }
                let mut out = [0u8; 32];
                for (i, chunk) in v.as_bytes().chunks(2).enumerate() {
                    let hi = (chunk[0] as char)
                        .to_digit(16)
                        .ok_or_else(|| de::Error::custom("invalid hex digit"))?;
                    let lo = (chunk[1] as char)
                        .to_digit(16)
                        .ok_or_else(|| de::Error::custom("invalid hex digit"))?;
                    out[i] = ((hi << 4) | lo) as u8;
                }
                Ok(Checksum(out))
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

/// Split (multi-part) section of an object header.
///
/// Children of a large object carry the parent header inline so the logical
/// parent is reconstructible from any child.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitHeader {
    /// Identifier of the logical parent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<ObjectId>,
    /// Inline copy of the parent header.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent: Option<Box<ObjectHeader>>,
    /// Split operation identifier shared by all parts.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub split_id: Option<Uuid>,
    /// Previous part in the payload chain.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous: Option<ObjectId>,
    /// Child list; non-empty only on the link part.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<ObjectId>,
}

/// Structured object header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub id: ObjectId,
    pub container: ContainerId,
    pub owner: OwnerId,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub payload_size: u64,
    pub payload_checksum: Checksum,
    /// Optional homomorphic payload hash, kept opaque.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub homomorphic_hash: Option<Vec<u8>>,
    pub creation_epoch: u64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub split: Option<SplitHeader>,
    /// Detached signature bytes, kept opaque.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<Vec<u8>>,
}

impl ObjectHeader {
    /// Address of the object this header describes.
    #[must_use]
    pub fn address(&self) -> Address {
        Address::new(self.container, self.id)
    }

    /// Identifier of the logical parent, if this is a split part.
    #[must_use]
    pub fn parent_id(&self) -> Option<ObjectId> {
        self.split.as_ref().and_then(|s| s.parent_id)
    }

    /// Inline parent header, if carried.
    #[must_use]
    pub fn parent(&self) -> Option<&ObjectHeader> {
        self.split.as_ref().and_then(|s| s.parent.as_deref())
    }

    /// Whether this object is a part of a split object.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.parent_id().is_some()
    }

    /// Whether this is a top-level user object (goes into the root index).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.object_type == ObjectType::Regular && !self.is_child()
    }

    /// Value of the attribute with the given key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// Expiration epoch parsed from the reserved attribute.
    ///
    /// Returns `None` when the attribute is absent or not a decimal u64.
    #[must_use]
    pub fn expiration_epoch(&self) -> Option<u64> {
        self.attribute(ATTR_EXPIRATION_EPOCH)?.parse().ok()
    }
}

/// A stored object: header plus payload bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub header: ObjectHeader,
    pub payload: Bytes,
}

impl Object {
    /// Bundle a header with its payload.
    #[must_use]
    pub fn new(header: ObjectHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Address of the object.
    #[must_use]
    pub fn address(&self) -> Address {
        self.header.address()
    }

    /// Copy of the object with the payload elided (head form).
    #[must_use]
    pub fn cut_payload(&self) -> Self {
        Self {
            header: self.header.clone(),
            payload: Bytes::new(),
        }
    }

    /// Serialize into the on-disk frame.
    pub fn to_frame(&self) -> Result<Bytes> {
        let header = serde_json::to_vec(&self.header)?;
        let mut buf =
            BytesMut::with_capacity(FRAME_OVERHEAD + header.len() + self.payload.len());

        buf.put_slice(&FRAME_MAGIC);
        buf.put_u16_le(FRAME_VERSION);
        buf.put_u16_le(0); // flags
        buf.put_u32_le(header.len() as u32);
        buf.put_slice(&header);
        buf.put_slice(&self.payload);

        let crc = crc32c::crc32c(&buf[FRAME_OVERHEAD - 4..]);
        buf.put_u32_le(crc);

        Ok(buf.freeze())
    }

    /// Parse an on-disk frame.
    pub fn from_frame(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_OVERHEAD {
            return Err(Error::corrupted("object frame too small"));
        }

        let mut buf = data;

        let mut magic = [0u8; 8];
        buf.copy_to_slice(&mut magic);
        if magic != FRAME_MAGIC {
            return Err(Error::corrupted("invalid object frame magic"));
        }

        let version = buf.get_u16_le();
        if version != FRAME_VERSION {
            return Err(Error::corrupted(format!(
                "unsupported frame version: {version}"
            )));
        }
        let _flags = buf.get_u16_le();

        let header_len = buf.get_u32_le() as usize;
        let body = &data[FRAME_OVERHEAD - 4..data.len() - 4];
        if header_len > body.len() {
            return Err(Error::corrupted("header length exceeds frame"));
        }

        let crc = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap());
        if crc32c::crc32c(body) != crc {
            return Err(Error::corrupted("object frame checksum mismatch"));
        }

        let header: ObjectHeader = serde_json::from_slice(&body[..header_len])
            .map_err(|e| Error::corrupted(format!("bad object header: {e}")))?;
        let payload = Bytes::copy_from_slice(&body[header_len..]);

        Ok(Self { header, payload })
    }
}

/// Payload of a tombstone object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Epoch after which the tombstone itself may be collected.
    pub expiration_epoch: u64,
    /// Objects this tombstone inhumes, within the tombstone's container.
    pub members: Vec<ObjectId>,
}

impl Tombstone {
    /// Serialize into payload bytes.
    pub fn to_payload(&self) -> Result<Bytes> {
        Ok(serde_json::to_vec(self)?.into())
    }

    /// Parse from payload bytes.
    pub fn from_payload(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::corrupted(format!("bad tombstone payload: {e}")))
    }
}

/// Payload of a lock object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockList {
    /// Objects this lock keeps alive, within the lock's container.
    pub members: Vec<ObjectId>,
}

impl LockList {
    /// Serialize into payload bytes.
    pub fn to_payload(&self) -> Result<Bytes> {
        Ok(serde_json::to_vec(self)?.into())
    }

    /// Parse from payload bytes.
    pub fn from_payload(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::corrupted(format!("bad lock payload: {e}")))
    }
}

/// Information about a split object returned by raw head/get on the parent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitInfo {
    /// Split operation identifier.
    pub split_id: Option<Uuid>,
    /// Link part, when known.
    pub link: Option<ObjectId>,
    /// Last known part of the chain, when known.
    pub last_part: Option<ObjectId>,
}

impl fmt::Display for SplitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "split_id={:?} link={:?} last_part={:?}",
            self.split_id, self.link, self.last_part
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_object(payload: &[u8]) -> Object {
        let header = ObjectHeader {
            id: ObjectId::from_content(payload),
            container: ContainerId::new(rand::random()),
            owner: OwnerId::new(rand::random()),
            object_type: ObjectType::Regular,
            payload_size: payload.len() as u64,
            payload_checksum: Checksum::compute(payload),
            homomorphic_hash: None,
            creation_epoch: 7,
            attributes: vec![Attribute::new("FileName", "sample.bin")],
            split: None,
            signature: None,
        };
        Object::new(header, Bytes::copy_from_slice(payload))
    }

    #[test]
    fn test_frame_roundtrip() {
        let obj = sample_object(&[0xAB; 1024]);
        let frame = obj.to_frame().unwrap();
        let back = Object::from_frame(&frame).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn test_frame_detects_corruption() {
        let obj = sample_object(b"hello");
        let mut frame = obj.to_frame().unwrap().to_vec();
        let mid = frame.len() / 2;
        frame[mid] ^= 0xFF;
        assert!(Object::from_frame(&frame).is_err());
    }

    #[test]
    fn test_frame_rejects_bad_magic() {
        let obj = sample_object(b"hello");
        let mut frame = obj.to_frame().unwrap().to_vec();
        frame[0] = b'X';
        assert!(Object::from_frame(&frame).is_err());
    }

    #[test]
    fn test_cut_payload_keeps_header() {
        let obj = sample_object(b"payload bytes");
        let head = obj.cut_payload();
        assert_eq!(head.header, obj.header);
        assert!(head.payload.is_empty());
        assert_eq!(head.header.payload_size, 13);
    }

    #[test]
    fn test_expiration_epoch_attribute() {
        let mut obj = sample_object(b"x");
        assert_eq!(obj.header.expiration_epoch(), None);

        obj.header
            .attributes
            .push(Attribute::new(ATTR_EXPIRATION_EPOCH, "42"));
        assert_eq!(obj.header.expiration_epoch(), Some(42));
    }

    #[test]
    fn test_tombstone_payload_roundtrip() {
        let ts = Tombstone {
            expiration_epoch: 100,
            members: vec![ObjectId::from_content(b"a"), ObjectId::from_content(b"b")],
        };
        let payload = ts.to_payload().unwrap();
        assert_eq!(Tombstone::from_payload(&payload).unwrap(), ts);
    }

    #[test]
    fn test_checksum_verify() {
        let sum = Checksum::compute(b"data");
        assert!(sum.verify(b"data"));
        assert!(!sum.verify(b"data!"));
    }
}
