//! 20-byte validator / account address.

use sbor::prelude::BasicSbor;
use thiserror::Error;

/// Errors raised when parsing an address from hex.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("expected 20 bytes, got {0}")]
    WrongLength(usize),
}

/// A 20-byte address identifying a validator or account.
///
/// The all-zero address is the "none" sentinel used for proposer seeding at
/// the start of a height.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero sentinel address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Construct from a fixed byte array.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    /// View as raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// True if this is the sentinel address.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse from a hex string with optional `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, AddressParseError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AddressParseError::InvalidHex(e.to_string()))?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressParseError::WrongLength(bytes.len()))?;
        Ok(Address(arr))
    }

    /// Lowercase hex rendering with `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let a = Address::from_bytes([0x11; 20]);
        assert_eq!(Address::from_hex(&a.to_hex()).unwrap(), a);
    }

    #[test]
    fn zero_sentinel() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::from_bytes([1; 20]).is_zero());
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert_eq!(
            Address::from_hex("0x0102"),
            Err(AddressParseError::WrongLength(2))
        );
    }
}
