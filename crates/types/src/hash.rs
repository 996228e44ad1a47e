//! 32-byte content-addressed identifier.

use sbor::prelude::BasicSbor;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Errors raised when parsing a hash from hex.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// A 32-byte Keccak-256 digest identifying blocks, headers and bodies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Construct from a fixed byte array.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Construct by hashing arbitrary input with Keccak-256.
    pub fn hash(data: impl AsRef<[u8]>) -> Self {
        keccak256(data.as_ref())
    }

    /// View as raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True if this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse from a hex string with optional `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| HexError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| HexError::WrongLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Hash(arr))
    }

    /// Lowercase hex rendering with `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

/// Keccak-256 of the input.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Abbreviate: first four bytes are enough to tell hashes apart in logs.
        write!(f, "0x{}..", hex::encode(&self.0[..4]))
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for Hash {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
