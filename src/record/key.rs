//! Primary keys and key hashing

use std::io::Cursor;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::config::HashFunction;
use crate::error::Result;

use super::Value;

/// Immutable tuple of primary key column values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Single-column key
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Stable byte encoding of the key tuple (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.0)?)
    }

    /// Key identity as seen by the key index under the given hash function
    pub fn hashed(&self, hash_function: HashFunction) -> Result<HashedKey> {
        match hash_function {
            HashFunction::None => Ok(HashedKey::Raw(self.clone())),
            HashFunction::Md5 => {
                let mut digest = [0u8; 16];
                digest.copy_from_slice(&Md5::digest(self.to_bytes()?));
                Ok(HashedKey::Digest(digest))
            }
            HashFunction::Murmur3 => {
                let bytes = self.to_bytes()?;
                let hash = murmur3::murmur3_x64_128(&mut Cursor::new(bytes), 0)?;
                Ok(HashedKey::Digest(hash.to_le_bytes()))
            }
        }
    }
}

/// Primary key after hashing: either the key itself or a 16-byte digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashedKey {
    Raw(PrimaryKey),
    Digest([u8; 16]),
}
