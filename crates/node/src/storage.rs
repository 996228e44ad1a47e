//! RocksDB block store.
//!
//! All operations are synchronous blocking I/O; handlers that run inside
//! the async runtime keep calls short (point lookups and batched writes).

use istria_chain::{Blockchain, StatusTracker, StoreError, SyncStatus};
use istria_types::{Block, Body, Hash, Header, IbftExtra, Receipts};
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const CF_HEADERS: &str = "headers";
const CF_BODIES: &str = "bodies";
const CF_RECEIPTS: &str = "receipts";
const CF_CANON: &str = "canon";
const CF_META: &str = "meta";

const META_HEAD: &[u8] = b"head";

/// RocksDB-backed implementation of the blockchain facade.
///
/// Column families:
/// - `headers`: header hash → encoded header
/// - `bodies`: header hash → encoded body
/// - `receipts`: header hash → encoded receipts
/// - `canon`: big-endian height → header hash
/// - `meta`: head pointer
pub struct RocksDbStore {
    db: DB,
    status: Arc<StatusTracker>,
    /// Serializes canonical appends; reads go straight to the db.
    write_lock: Mutex<()>,
}

impl RocksDbStore {
    /// Open (or create) a store, writing `genesis` on first use.
    pub fn open(path: &Path, genesis: Header) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_HEADERS, CF_BODIES, CF_RECEIPTS, CF_CANON, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let head = match read_meta_head(&db)? {
            Some(hash) => {
                let head = read_header(&db, &hash)?
                    .ok_or_else(|| StoreError::Backend("head header missing".into()))?;
                info!(number = head.number, "Opened block store");
                head
            }
            None => {
                let hash = genesis.hash();
                let mut batch = WriteBatch::default();
                put_block(
                    &db,
                    &mut batch,
                    &Block::new(genesis.clone(), Body::default()),
                )?;
                batch.put_cf(cf(&db, CF_RECEIPTS)?, hash.as_bytes(), Receipts::default().encode());
                batch.put_cf(cf(&db, CF_META)?, META_HEAD, hash.as_bytes());
                db.write(batch).map_err(|e| StoreError::Backend(e.to_string()))?;
                info!(hash = ?hash, "Wrote genesis block");
                genesis
            }
        };

        let status = Arc::new(StatusTracker::new(SyncStatus {
            hash: head.hash(),
            number: head.number,
            difficulty: (head.number as u128) + 1,
        }));

        Ok(Self {
            db,
            status,
            write_lock: Mutex::new(()),
        })
    }

    /// The status tracker updated by this store's writes.
    pub fn status(&self) -> Arc<StatusTracker> {
        self.status.clone()
    }

    /// Attach receipts to a written block.
    pub fn put_receipts(&self, hash: Hash, receipts: &Receipts) -> Result<(), StoreError> {
        self.db
            .put_cf(cf(&self.db, CF_RECEIPTS)?, hash.as_bytes(), receipts.encode())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl Blockchain for RocksDbStore {
    fn header_by_number(&self, number: u64) -> Option<Header> {
        let cf_canon = cf(&self.db, CF_CANON).ok()?;
        let hash = self.db.get_cf(cf_canon, number.to_be_bytes()).ok()??;
        let hash = Hash::from_bytes(hash.try_into().ok()?);
        read_header(&self.db, &hash).ok()?
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
        read_header(&self.db, hash).ok()?
    }

    fn body_by_hash(&self, hash: &Hash) -> Option<Body> {
        let cf_bodies = cf(&self.db, CF_BODIES).ok()?;
        let raw = self.db.get_cf(cf_bodies, hash.as_bytes()).ok()??;
        sbor::basic_decode(&raw).ok()
    }

    fn receipts_by_hash(&self, hash: &Hash) -> Result<Receipts, StoreError> {
        let raw = self
            .db
            .get_cf(cf(&self.db, CF_RECEIPTS)?, hash.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::ReceiptsMissing(*hash))?;
        Receipts::decode(&raw).map_err(|e| StoreError::Backend(format!("{e:?}")))
    }

    fn write_blocks(&self, blocks: Vec<Block>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();

        let mut head = self.header();
        let mut batch = WriteBatch::default();
        let mut new_head = None;

        for block in blocks {
            let number = block.number();
            if number != head.number + 1 {
                return Err(StoreError::NotSequential {
                    number,
                    head: head.number,
                });
            }
            if block.header.parent_hash != head.hash() {
                return Err(StoreError::BrokenParentLink { number });
            }

            put_block(&self.db, &mut batch, &block)?;
            head = block.header.clone();
            new_head = Some(block.header);
        }

        let Some(new_head) = new_head else {
            return Ok(());
        };
        batch.put_cf(cf(&self.db, CF_META)?, META_HEAD, new_head.hash().as_bytes());
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.status.advance(&new_head);
        debug!(number = new_head.number, "Canonical head advanced");
        Ok(())
    }

    fn header(&self) -> Header {
        // The head pointer always resolves: it is written with the batch
        // that writes the header it points to.
        read_meta_head(&self.db)
            .ok()
            .flatten()
            .and_then(|hash| read_header(&self.db, &hash).ok().flatten())
            .unwrap_or_default()
    }
}

fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily, StoreError> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::Backend(format!("column family {name} missing")))
}

fn read_meta_head(db: &DB) -> Result<Option<Hash>, StoreError> {
    let raw = db
        .get_cf(cf(db, CF_META)?, META_HEAD)
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(raw.and_then(|bytes| bytes.try_into().ok().map(Hash::from_bytes)))
}

fn read_header(db: &DB, hash: &Hash) -> Result<Option<Header>, StoreError> {
    let raw = db
        .get_cf(cf(db, CF_HEADERS)?, hash.as_bytes())
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    match raw {
        Some(bytes) => Ok(Some(
            sbor::basic_decode(&bytes).map_err(|e| StoreError::Backend(format!("{e:?}")))?,
        )),
        None => Ok(None),
    }
}

fn put_block(db: &DB, batch: &mut WriteBatch, block: &Block) -> Result<(), StoreError> {
    let hash = block.hash();
    batch.put_cf(
        cf(db, CF_HEADERS)?,
        hash.as_bytes(),
        sbor::basic_encode(&block.header).expect("header encoding is infallible"),
    );
    batch.put_cf(
        cf(db, CF_BODIES)?,
        hash.as_bytes(),
        sbor::basic_encode(&block.body).expect("body encoding is infallible"),
    );
    batch.put_cf(
        cf(db, CF_CANON)?,
        block.number().to_be_bytes(),
        hash.as_bytes(),
    );
    Ok(())
}

/// Genesis header for a fresh chain.
pub fn genesis_header(validators: Vec<istria_types::Address>, gas_limit: u64) -> Header {
    Header {
        gas_limit,
        extra: IbftExtra::new(validators).encode(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istria_types::test_utils::test_address;

    fn open_temp() -> (tempfile::TempDir, RocksDbStore) {
        let dir = tempfile::tempdir().unwrap();
        let genesis = genesis_header(vec![test_address(1)], 8_000_000);
        let store = RocksDbStore::open(dir.path(), genesis).unwrap();
        (dir, store)
    }

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
    fn genesis_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = genesis_header(vec![test_address(1)], 8_000_000);
        let hash = genesis.hash();
        {
            let store = RocksDbStore::open(dir.path(), genesis.clone()).unwrap();
            assert_eq!(store.header().hash(), hash);
        }
        // Reopen: the head survives.
        let store = RocksDbStore::open(dir.path(), genesis).unwrap();
        assert_eq!(store.header().hash(), hash);
        assert_eq!(store.status().get().number, 0);
    }

    #[test]
    fn write_and_lookup() {
        let (_dir, store) = open_temp();
        let block = child_of(&store.header());
        let hash = block.hash();

        store.write_blocks(vec![block]).unwrap();

        assert_eq!(store.header().number, 1);
        assert_eq!(store.header_by_number(1).unwrap().hash(), hash);
        assert_eq!(store.header_by_hash(&hash).unwrap().number, 1);
        assert!(store.body_by_hash(&hash).is_some());
        assert_eq!(store.status().get().number, 1);
    }

    #[test]
    fn head_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = genesis_header(vec![test_address(1)], 8_000_000);
        let expected = {
            let store = RocksDbStore::open(dir.path(), genesis.clone()).unwrap();
            for _ in 0..3 {
                let block = child_of(&store.header());
                store.write_blocks(vec![block]).unwrap();
            }
            store.header().hash()
        };

        let store = RocksDbStore::open(dir.path(), genesis).unwrap();
        assert_eq!(store.header().number, 3);
        assert_eq!(store.header().hash(), expected);
        assert_eq!(store.status().get().number, 3);
    }

    #[test]
    fn write_rejects_gap() {
        let (_dir, store) = open_temp();
        let mut block = child_of(&store.header());
        block.header.number = 9;
        assert!(matches!(
            store.write_blocks(vec![block]),
            Err(StoreError::NotSequential { .. })
        ));
    }

    #[test]
    fn receipts_roundtrip_and_miss() {
        let (_dir, store) = open_temp();
        let block = child_of(&store.header());
        let hash = block.hash();
        store.write_blocks(vec![block]).unwrap();

        // Not written yet: authoritative storage, so a miss is an error.
        assert!(matches!(
            store.receipts_by_hash(&hash),
            Err(StoreError::ReceiptsMissing(_))
        ));

        store.put_receipts(hash, &Receipts::default()).unwrap();
        assert_eq!(store.receipts_by_hash(&hash).unwrap(), Receipts::default());
    }
}
