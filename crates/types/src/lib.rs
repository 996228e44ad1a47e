//! Core types for the Istria consensus engine.
//!
//! This crate provides the foundational types used throughout the
//! implementation:
//!
//! - **Primitives**: [`Address`], [`Hash`], signing keys and recoverable
//!   signatures
//! - **Chain entities**: [`Header`], [`Body`], [`Block`], [`Receipt`]
//! - **Consensus types**: [`View`], [`ValidatorSet`], the IBFT extra-data
//!   envelope ([`IbftExtra`])
//!
//! # Design Philosophy
//!
//! This crate is self-contained and depends on no other workspace crates,
//! making it the foundation layer. Every entity that crosses the wire or the
//! store derives `BasicSbor`, so one encoding is canonical everywhere.

mod address;
mod block;
mod crypto;
mod extra;
mod hash;
mod receipt;
mod validator;
mod view;

pub use address::{Address, AddressParseError};
pub use block::{Block, Body, Header, Transaction};
pub use crypto::{CryptoError, KeyPair, Signature};
pub use extra::{ExtraError, IbftExtra};
pub use hash::{keccak256, Hash, HexError};
pub use receipt::{Log, Receipt, Receipts};
pub use validator::ValidatorSet;
pub use view::View;

/// Test utilities shared across workspace crates.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Deterministic address from a seed byte.
    pub fn test_address(seed: u8) -> Address {
        Address::from_bytes([seed; 20])
    }

    /// Deterministic hash from a seed byte.
    pub fn test_hash(seed: u8) -> Hash {
        Hash::from_bytes([seed; 32])
    }

    /// Deterministic key pair from a seed byte.
    ///
    /// Secret scalars are derived from the seed; a zero seed is bumped to
    /// one since zero is not a valid secp256k1 scalar.
    pub fn test_keypair(seed: u8) -> KeyPair {
        let seed = seed.max(1);
        let mut secret = [0u8; 32];
        secret[31] = seed;
        KeyPair::from_secret_bytes(&secret).expect("seeded secret is a valid scalar")
    }

    /// A validator set of `n` seeded key pairs, ordered by seed.
    pub fn test_validators(n: u8) -> (Vec<KeyPair>, ValidatorSet) {
        let keys: Vec<KeyPair> = (1..=n).map(test_keypair).collect();
        let set: ValidatorSet = keys.iter().map(|k| k.address()).collect();
        (keys, set)
    }
}
