// Portal identifiers
//
// SAFETY INVARIANTS:
// 1. Hash is always SHA3-256 (32 bytes), rendered as lowercase hex on the wire
// 2. Payment addresses carry a 32-byte ed25519 public key; the owning shard is derived from its last byte
// 3. Token identifiers are compared as exact strings (no case folding)

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};
use std::fmt;

use crate::errors::StateError;

/// 32-byte content hash used for transaction ids, metadata hashes and state roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// SHA3-256 over `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&result[..]);
        Hash(out)
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, StateError> {
        let bytes = hex::decode(s).map_err(|e| StateError::InvalidHash(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(StateError::InvalidHash(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash(out))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Token identifier (PRV or a portal public token such as pBTC).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        TokenId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        TokenId(s.to_string())
    }
}

/// Chain-native payment address: hex of the owner's ed25519 public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentAddress(pub String);

impl PaymentAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        PaymentAddress(addr.into())
    }

    pub fn from_public_key(pk: &[u8; 32]) -> Self {
        PaymentAddress(hex::encode(pk))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the embedded public key.
    pub fn public_key(&self) -> Result<[u8; 32], StateError> {
        let bytes = hex::decode(&self.0).map_err(|e| StateError::InvalidAddress(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(StateError::InvalidAddress(format!(
                "expected 32-byte key, got {} bytes",
                bytes.len()
            )));
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&bytes);
        Ok(pk)
    }

    /// Shard owning this address.
    pub fn shard_id(&self, num_shards: u8) -> Result<u8, StateError> {
        if num_shards == 0 {
            return Err(StateError::Config("number of shards must be positive".into()));
        }
        let pk = self.public_key()?;
        Ok(pk[31] % num_shards)
    }
}

impl fmt::Display for PaymentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ceiling division in u128.
pub(crate) fn div_ceil_u128(num: u128, den: u128) -> u128 {
    if den == 0 {
        return 0;
    }
    num / den + u128::from(num % den != 0)
}

/// Narrow a u128 back into u64.
pub(crate) fn to_u64(v: u128) -> Result<u64, StateError> {
    u64::try_from(v).map_err(|_| StateError::Overflow)
}
