//! Headers, bodies and blocks.

use crate::{keccak256, Address, Hash, IbftExtra};
use sbor::prelude::BasicSbor;

/// A block header.
///
/// The `extra` field carries the SBOR-encoded [`IbftExtra`] envelope:
/// validator set, proposer seal and committed seals.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Header {
    /// Hash of the parent header.
    pub parent_hash: Hash,
    /// Height; parent.number + 1.
    pub number: u64,
    /// State root after executing this block.
    pub state_root: Hash,
    /// Merkle root of the transaction list.
    pub tx_root: Hash,
    /// Merkle root of the receipt list.
    pub receipts_root: Hash,
    /// Address of the block producer.
    pub miner: Address,
    /// Gas ceiling for the block.
    pub gas_limit: u64,
    /// Gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Seconds since the epoch; strictly greater than the parent's.
    pub timestamp: u64,
    /// Per-block difficulty. IBFT chains use 1 per sealed block.
    pub difficulty: u64,
    /// Opaque consensus payload (see [`IbftExtra`]).
    pub extra: Vec<u8>,
}

impl Header {
    /// Seal-independent identity of this header.
    ///
    /// Computed over the header with the proposer seal and committed seals
    /// cleared (validators kept), so every honest committer of a height
    /// derives the same hash regardless of which 2f+1 seal subset it
    /// collected.
    pub fn hash(&self) -> Hash {
        let sealless = match IbftExtra::decode(&self.extra) {
            Ok(extra) => {
                let mut h = self.clone();
                h.extra = extra.into_sealless().encode();
                h
            }
            // Headers without a well-formed envelope (e.g. mid-construction)
            // hash over the raw bytes.
            Err(_) => self.clone(),
        };
        keccak256(&sbor::basic_encode(&sealless).expect("header encoding is infallible"))
    }

    /// True for height 0.
    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }
}

/// An opaque signed transaction.
///
/// Execution semantics live behind the `Executor` collaborator; consensus
/// and sync only move transactions around and hash them.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Transaction {
    /// Sender-ordered nonce.
    pub nonce: u64,
    /// Gas offered.
    pub gas: u64,
    /// Recipient, or none for contract creation.
    pub to: Option<Address>,
    /// Transferred value.
    pub value: u128,
    /// Call data.
    pub input: Vec<u8>,
    /// Sender signature bytes.
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Content hash of the transaction.
    pub fn hash(&self) -> Hash {
        keccak256(&sbor::basic_encode(self).expect("transaction encoding is infallible"))
    }
}

/// The transaction and uncle lists associated with a header.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Body {
    /// Ordered transactions.
    pub transactions: Vec<Transaction>,
    /// Uncle headers. Always empty under IBFT; kept for chain-standard shape.
    pub uncles: Vec<Header>,
}

/// A header together with its body.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Block {
    /// The header.
    pub header: Header,
    /// The body.
    pub body: Body,
}

impl Block {
    /// Assemble a block.
    pub fn new(header: Header, body: Body) -> Self {
        Self { header, body }
    }

    /// The block's identity: its header hash.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// The block's height.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Canonical encoding of the whole block.
    pub fn encode(&self) -> Vec<u8> {
        sbor::basic_encode(self).expect("block encoding is infallible")
    }

    /// Decode a block from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, sbor::DecodeError> {
        sbor::basic_decode(bytes)
    }
}
