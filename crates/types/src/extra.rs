//! The IBFT extra-data envelope carried in `Header::extra`.

use crate::{Address, Signature};
use sbor::prelude::BasicSbor;
use thiserror::Error;

/// Errors raised when decoding the extra-data envelope.
#[derive(Debug, Error)]
pub enum ExtraError {
    #[error("malformed extra data: {0:?}")]
    Malformed(sbor::DecodeError),

    #[error("extra data is missing the proposer seal")]
    MissingProposerSeal,
}

/// Consensus payload of a header: the validator set active for the next
/// height, the proposer's seal over the header hash, and the committed
/// seals collected at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct IbftExtra {
    /// Validator set for the child height, in rotation order.
    pub validators: Vec<Address>,
    /// Proposer signature over the seal-independent header hash.
    pub proposer_seal: Signature,
    /// One seal per committing validator; at least 2f+1 after commit.
    pub committed_seals: Vec<Signature>,
}

impl IbftExtra {
    /// An envelope carrying only the validator set.
    pub fn new(validators: Vec<Address>) -> Self {
        Self {
            validators,
            proposer_seal: Signature::ZERO,
            committed_seals: Vec::new(),
        }
    }

    /// Canonical encoding, as stored in `Header::extra`.
    pub fn encode(&self) -> Vec<u8> {
        sbor::basic_encode(self).expect("extra encoding is infallible")
    }

    /// Decode from `Header::extra`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ExtraError> {
        sbor::basic_decode(bytes).map_err(ExtraError::Malformed)
    }

    /// The same envelope with both seal fields cleared; this is what the
    /// header hash is computed over.
    pub fn into_sealless(self) -> Self {
        Self {
            validators: self.validators,
            proposer_seal: Signature::ZERO,
            committed_seals: Vec::new(),
        }
    }

    /// The proposer seal, or an error if it is still the placeholder.
    pub fn proposer_seal(&self) -> Result<&Signature, ExtraError> {
        if self.proposer_seal.is_zero() {
            return Err(ExtraError::MissingProposerSeal);
        }
        Ok(&self.proposer_seal)
    }
}
