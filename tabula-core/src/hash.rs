//! Content addresses.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::StoreError;

/// Number of digest bytes kept from SHA-256.
pub const HASH_LEN: usize = 20;

/// Truncated SHA-256 digest of a chunk's canonical bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// zero hash, never produced by `of`
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    /// Hash arbitrary bytes.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&digest[..HASH_LEN]);
        Hash(arr)
    }

    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    /// Parse from a full-length hex string.
    pub fn from_hex(s: &str) -> Result<Self, StoreError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_LEN {
            return Err(StoreError::Deserialization(format!(
                "hash must be {} bytes, got {}",
                HASH_LEN,
                bytes.len()
            )));
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for logs and listings.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..12])
    }
}
