//! In-process facade implementation.

use crate::{Blockchain, StatusTracker, StoreError, SyncStatus};
use istria_types::{Block, Body, Hash, Header, Receipts};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct Inner {
    headers: HashMap<Hash, Header>,
    canon: BTreeMap<u64, Hash>,
    bodies: HashMap<Hash, Body>,
    receipts: HashMap<Hash, Receipts>,
    head: Header,
}

/// A complete [`Blockchain`] kept in memory.
///
/// Used by tests, tooling and local clusters; the production node uses the
/// RocksDB store. Reads take a shared lock, writes are serialized.
pub struct InMemoryChain {
    inner: RwLock<Inner>,
    status: Arc<StatusTracker>,
}

impl InMemoryChain {
    /// Start a chain from its genesis header.
    pub fn with_genesis(genesis: Header) -> Self {
        let hash = genesis.hash();
        let mut headers = HashMap::new();
        headers.insert(hash, genesis.clone());
        let mut canon = BTreeMap::new();
        canon.insert(genesis.number, hash);
        let mut bodies = HashMap::new();
        bodies.insert(hash, Body::default());
        let mut receipts = HashMap::new();
        receipts.insert(hash, Receipts::default());

        Self {
            status: Arc::new(StatusTracker::new(SyncStatus {
                hash,
                number: genesis.number,
                difficulty: genesis.difficulty.max(1) as u128,
            })),
            inner: RwLock::new(Inner {
                headers,
                canon,
                bodies,
                receipts,
                head: genesis,
            }),
        }
    }

    /// The status tracker fed by this chain's writes.
    pub fn status(&self) -> Arc<StatusTracker> {
        self.status.clone()
    }

    /// Attach receipts to an already-written block.
    pub fn put_receipts(&self, hash: Hash, receipts: Receipts) {
        self.inner.write().receipts.insert(hash, receipts);
    }
}

impl Blockchain for InMemoryChain {
    fn header_by_number(&self, number: u64) -> Option<Header> {
        let inner = self.inner.read();
        let hash = inner.canon.get(&number)?;
        inner.headers.get(hash).cloned()
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
        self.inner.read().headers.get(hash).cloned()
    }

    fn body_by_hash(&self, hash: &Hash) -> Option<Body> {
        self.inner.read().bodies.get(hash).cloned()
    }

    fn receipts_by_hash(&self, hash: &Hash) -> Result<Receipts, StoreError> {
        self.inner
            .read()
            .receipts
            .get(hash)
            .cloned()
            .ok_or(StoreError::ReceiptsMissing(*hash))
    }

    fn write_blocks(&self, blocks: Vec<Block>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for block in blocks {
            let number = block.number();
            if number != inner.head.number + 1 {
                return Err(StoreError::NotSequential {
                    number,
                    head: inner.head.number,
                });
            }
            if block.header.parent_hash != inner.head.hash() {
                return Err(StoreError::BrokenParentLink { number });
            }

            let hash = block.hash();
            inner.headers.insert(hash, block.header.clone());
            inner.canon.insert(number, hash);
            inner.bodies.insert(hash, block.body);
            inner.receipts.entry(hash).or_default();
            inner.head = block.header;

            self.status.advance(&inner.head);
            tracing::debug!(number, hash = ?hash, "Block written");
        }
        Ok(())
    }

    fn header(&self) -> Header {
        self.inner.read().head.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child_of(parent: &Header) -> Block {
        Block::new(
            Header {
                parent_hash: parent.hash(),
                number: parent.number + 1,
                timestamp: parent.timestamp + 1,
                gas_limit: parent.gas_limit,
                difficulty: 1,
                ..Default::default()
            },
            Body::default(),
        )
    }

    #[test]
    fn write_advances_head_and_status() {
        let chain = InMemoryChain::with_genesis(Header::default());
        let block = child_of(&chain.header());
        let hash = block.hash();

        chain.write_blocks(vec![block]).unwrap();

        assert_eq!(chain.header().number, 1);
        assert_eq!(chain.status().get().number, 1);
        assert_eq!(chain.status().get().hash, hash);
        assert_eq!(chain.header_by_number(1).unwrap().number, 1);
        assert!(chain.body_by_hash(&hash).is_some());
    }

    #[test]
    fn write_rejects_gap() {
        let chain = InMemoryChain::with_genesis(Header::default());
        let mut block = child_of(&chain.header());
        block.header.number = 5;
        assert!(matches!(
            chain.write_blocks(vec![block]),
            Err(StoreError::NotSequential { .. })
        ));
    }

    #[test]
    fn write_rejects_broken_parent_link() {
        let chain = InMemoryChain::with_genesis(Header::default());
        let mut block = child_of(&chain.header());
        block.header.parent_hash = Hash::from_bytes([0xee; 32]);
        assert!(matches!(
            chain.write_blocks(vec![block]),
            Err(StoreError::BrokenParentLink { .. })
        ));
    }

    #[test]
    fn receipts_miss_is_an_error() {
        let chain = InMemoryChain::with_genesis(Header::default());
        let unknown = Hash::from_bytes([9; 32]);
        assert!(matches!(
            chain.receipts_by_hash(&unknown),
            Err(StoreError::ReceiptsMissing(_))
        ));
    }

    #[test]
    fn bodies_may_miss_silently() {
        let chain = InMemoryChain::with_genesis(Header::default());
        assert!(chain.body_by_hash(&Hash::from_bytes([9; 32])).is_none());
    }
}
