//! Identifier and addressing types
//!
//! Objects are addressed by a `(container, object)` pair. Both identifiers
//! are 32-byte hashes with a base58 textual form.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reserved attribute: expiration epoch of the object (decimal u64).
pub const ATTR_EXPIRATION_EPOCH: &str = "__NEOFS__EXPIRATION_EPOCH";

/// Reserved attribute: creation timestamp, unix seconds.
pub const ATTR_TIMESTAMP: &str = "Timestamp";

/// Reserved attribute: user-facing file name.
pub const ATTR_FILE_NAME: &str = "FileName";

/// Errors that can occur when parsing an identifier from text.
#[derive(Debug, Clone, Error)]
pub enum ParseIdError {
    #[error("invalid base58: {0}")]
    Base58(String),
    #[error("identifier must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("address must have the form <container>/<object>")]
    AddressForm,
}

macro_rules! hash_id {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Size of the identifier in bytes.
            pub const SIZE: usize = $len;

            /// Create from raw bytes.
            #[must_use]
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Parse from a byte slice.
            pub fn from_slice(data: &[u8]) -> Result<Self, ParseIdError> {
                let bytes: [u8; $len] =
                    data.try_into().map_err(|_| ParseIdError::WrongLength {
                        expected: $len,
                        actual: data.len(),
                    })?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", bs58::encode(&self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = bs58::decode(s)
                    .into_vec()
                    .map_err(|e| ParseIdError::Base58(e.to_string()))?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl Visitor<'_> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "a base58 string")
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<$name, E> {
                        v.parse().map_err(de::Error::custom)
                    }
                }

                deserializer.deserialize_str(IdVisitor)
            }
        }
    };
}

hash_id!(
    /// Unique identifier of an object: a 32-byte content hash.
    ObjectId,
    32
);

hash_id!(
    /// Unique identifier of a container.
    ContainerId,
    32
);

hash_id!(
    /// Identifier of an object owner (wallet-style, kept opaque here).
    OwnerId,
    25
);

impl ObjectId {
    /// Derive an identifier from content bytes (sha256).
    #[must_use]
    pub fn from_content(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

/// Type of a stored object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Plain user object.
    #[default]
    Regular,
    /// Object whose payload enumerates inhumed members.
    Tombstone,
    /// Storage group object.
    StorageGroup,
    /// Object whose payload enumerates locked members.
    Lock,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => write!(f, "regular"),
            Self::Tombstone => write!(f, "tombstone"),
            Self::StorageGroup => write!(f, "storage-group"),
            Self::Lock => write!(f, "lock"),
        }
    }
}

/// Address of an object: the `(container, object)` pair.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Container the object belongs to.
    pub container: ContainerId,
    /// Object identifier within the container.
    pub object: ObjectId,
}

impl Address {
    /// Encoded size in bytes.
    pub const SIZE: usize = ContainerId::SIZE + ObjectId::SIZE;

    /// Create a new address.
    #[must_use]
    pub const fn new(container: ContainerId, object: ObjectId) -> Self {
        Self { container, object }
    }

    /// Binary form: container bytes followed by object bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..ContainerId::SIZE].copy_from_slice(self.container.as_bytes());
        buf[ContainerId::SIZE..].copy_from_slice(self.object.as_bytes());
        buf
    }

    /// Parse the binary form produced by [`Address::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseIdError> {
        if data.len() != Self::SIZE {
            return Err(ParseIdError::WrongLength {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            container: ContainerId::from_slice(&data[..ContainerId::SIZE])?,
            object: ObjectId::from_slice(&data[ContainerId::SIZE..])?,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.object)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cid, oid) = s.split_once('/').ok_or(ParseIdError::AddressForm)?;
        Ok(Self {
            container: cid.parse()?,
            object: oid.parse()?,
        })
    }
}

/// A single key/value attribute of an object.
///
/// Attribute order is preserved; keys are unique within one object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    /// Create a new attribute.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_id() -> ObjectId {
        ObjectId::new(rand::random())
    }

    #[test]
    fn test_object_id_base58_roundtrip() {
        let id = random_id();
        let text = id.to_string();
        let parsed: ObjectId = text.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_object_id_rejects_wrong_length() {
        let short = bs58::encode(&[1u8; 16]).into_string();
        assert!(short.parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_address_text_roundtrip() {
        let addr = Address::new(ContainerId::new(rand::random()), random_id());
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn test_address_binary_roundtrip() {
        let addr = Address::new(ContainerId::new(rand::random()), random_id());
        let bytes = addr.to_bytes();
        assert_eq!(Address::from_bytes(&bytes).unwrap(), addr);
    }

    #[test]
    fn test_id_json_is_base58_string() {
        let id = random_id();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_content_derived_id_is_stable() {
        let a = ObjectId::from_content(b"payload");
        let b = ObjectId::from_content(b"payload");
        assert_eq!(a, b);
        assert_ne!(a, ObjectId::from_content(b"other"));
    }
}
