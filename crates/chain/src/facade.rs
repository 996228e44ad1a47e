//! The storage contract the core requires from its collaborator.

use istria_types::{Block, Body, Hash, Header, Receipts};
use thiserror::Error;

/// Errors surfaced by the block store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("block {number} does not extend head {head}")]
    NotSequential { number: u64, head: u64 },

    #[error("block {number} parent hash mismatch")]
    BrokenParentLink { number: u64 },

    #[error("receipts for {0} not found")]
    ReceiptsMissing(Hash),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// The thin contract the core needs from storage.
///
/// Implementations must be safe for concurrent reads; the store is the
/// single writer of canonical blocks and both the sync driver and the IBFT
/// driver route writes through it.
pub trait Blockchain: Send + Sync {
    /// Header at a canonical height.
    fn header_by_number(&self, number: u64) -> Option<Header>;

    /// Header by hash.
    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;

    /// Body by header hash. A miss is not an error: bodies may be pruned.
    fn body_by_hash(&self, hash: &Hash) -> Option<Body>;

    /// Receipts by header hash. Receipts are authoritative storage, so a
    /// miss is an error.
    fn receipts_by_hash(&self, hash: &Hash) -> Result<Receipts, StoreError>;

    /// Atomically append blocks to the canonical chain, updating the status
    /// tracker on success.
    fn write_blocks(&self, blocks: Vec<Block>) -> Result<(), StoreError>;

    /// The current head header.
    fn header(&self) -> Header;
}
