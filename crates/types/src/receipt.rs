//! Per-transaction execution results.

use crate::{keccak256, Address, Hash};
use sbor::prelude::BasicSbor;

/// A log record emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<Hash>,
    /// Unindexed payload.
    pub data: Vec<u8>,
}

/// The execution result of a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Receipt {
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas consumed by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Gas consumed by this transaction alone.
    pub gas_used: u64,
    /// Hash of the transaction this receipt belongs to.
    pub tx_hash: Hash,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
}

/// The receipt sequence of one block, retrievable by header hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Receipts(pub Vec<Receipt>);

impl Receipts {
    /// Canonical encoding of the sequence.
    pub fn encode(&self) -> Vec<u8> {
        sbor::basic_encode(self).expect("receipts encoding is infallible")
    }

    /// Decode a sequence from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, sbor::DecodeError> {
        sbor::basic_decode(bytes)
    }

    /// Merkle-style commitment over the sequence.
    pub fn root(&self) -> Hash {
        keccak256(&self.encode())
    }

    /// Number of receipts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no receipts are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Receipt>> for Receipts {
    fn from(v: Vec<Receipt>) -> Self {
        Receipts(v)
    }
}
