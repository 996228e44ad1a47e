//! Signing keys and recoverable signatures.
//!
//! Thin wrappers over secp256k1 ECDSA. The consensus layer signs the
//! Keccak-256 digest of a message and recovers the sender address from the
//! 65-byte signature, so no public key ever travels on the wire.

use crate::{keccak256, Address, Hash};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sbor::prelude::BasicSbor;
use thiserror::Error;

/// Errors raised by signing and recovery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid signature encoding")]
    MalformedSignature,

    #[error("signature recovery failed")]
    RecoveryFailed,
}

/// A 65-byte recoverable ECDSA signature (r || s || v).
#[derive(Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    /// The all-zero placeholder signature.
    pub const ZERO: Signature = Signature([0u8; 65]);

    /// Construct from raw bytes.
    pub const fn from_bytes(bytes: [u8; 65]) -> Self {
        Signature(bytes)
    }

    /// View as raw bytes.
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// True if this is the placeholder signature.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Recover the signer address from the digest this signature was
    /// produced over.
    pub fn recover(&self, digest: &Hash) -> Result<Address, CryptoError> {
        let sig = EcdsaSignature::from_slice(&self.0[..64])
            .map_err(|_| CryptoError::MalformedSignature)?;
        let recid =
            RecoveryId::from_byte(self.0[64]).ok_or(CryptoError::MalformedSignature)?;
        let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recid)
            .map_err(|_| CryptoError::RecoveryFailed)?;
        Ok(address_of(&key))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sig(0x{}..)", hex::encode(&self.0[..4]))
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::ZERO
    }
}

/// A secp256k1 signing key with its derived address.
#[derive(Clone)]
pub struct KeyPair {
    secret: SigningKey,
    address: Address,
}

impl KeyPair {
    /// Construct from 32 secret-scalar bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        let address = address_of(secret.verifying_key());
        Ok(Self { secret, address })
    }

    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let secret = SigningKey::random(&mut k256::elliptic_curve::rand_core::OsRng);
        let address = address_of(secret.verifying_key());
        Self { secret, address }
    }

    /// The address derived from this key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign the Keccak-256 digest of `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.sign_digest(&keccak256(message))
    }

    /// Sign a precomputed digest.
    pub fn sign_digest(&self, digest: &Hash) -> Signature {
        let (sig, recid) = self
            .secret
            .sign_prehash_recoverable(digest.as_bytes())
            .expect("signing a 32-byte prehash cannot fail");
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(sig.to_bytes().as_slice());
        out[64] = recid.to_byte();
        Signature(out)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("address", &self.address).finish()
    }
}

/// Derive an address from a verifying key: the low 20 bytes of the
/// Keccak-256 of the uncompressed public key (tag byte stripped).
fn address_of(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let digest = keccak256(&encoded.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.as_bytes()[12..]);
    Address(out)
}
