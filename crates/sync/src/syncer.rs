//! The sync driver.

use crate::client::{get_bodies, get_headers, ClientError, SyncClient};
use crate::{NotifyQueue, PeerBook, PeerId, SyncConfig};
use istria_chain::{Blockchain, StoreError, SyncStatus};
use istria_types::{Block, Body, Header};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Errors inside one sync attempt against one peer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("header chain invalid: {0}")]
    BadChain(String),

    #[error("peer no longer has the body for height {0}")]
    MissingBody(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle given to the consensus side.
///
/// Cheap to clone; mirrors the peer book and carries the channel used to
/// kick a catch-up cycle.
#[derive(Clone)]
pub struct SyncerHandle {
    peers: Arc<PeerBook>,
    queue: Arc<NotifyQueue>,
    sync_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl SyncerHandle {
    /// The shared peer status book.
    pub fn peers(&self) -> &Arc<PeerBook> {
        &self.peers
    }

    /// The notify queue fed by the server endpoints.
    pub fn queue(&self) -> &Arc<NotifyQueue> {
        &self.queue
    }

    /// Best height any peer advertises.
    pub fn best_peer_number(&self) -> Option<u64> {
        self.peers.best_number()
    }

    /// Ask the syncer to run a catch-up cycle. The returned channel fires
    /// when the cycle ends (caught up or out of candidate peers).
    pub fn request_sync(&self) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sync_tx.try_send(done_tx).is_err() {
            // A cycle is already queued; the caller will re-check and ask
            // again if still behind.
            debug!("Sync request dropped, cycle already pending");
        }
        done_rx
    }
}

/// Downloads the missing range from the best peer and applies pushed
/// blocks. Runs as a dedicated task beside the IBFT driver.
pub struct Syncer {
    config: SyncConfig,
    store: Arc<dyn Blockchain>,
    peers: Arc<PeerBook>,
    queue: Arc<NotifyQueue>,
    client: Arc<dyn SyncClient>,
    sync_rx: mpsc::Receiver<oneshot::Sender<()>>,
    cancel: CancellationToken,
}

impl Syncer {
    /// Build a syncer and the handle the consensus side keeps.
    ///
    /// `queue` is shared with whatever feeds block pushes (the sync
    /// service, the network adapter's announcement topic).
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn Blockchain>,
        queue: Arc<NotifyQueue>,
        client: Arc<dyn SyncClient>,
        cancel: CancellationToken,
    ) -> (Self, SyncerHandle) {
        let peers = Arc::new(PeerBook::new());
        let (sync_tx, sync_rx) = mpsc::channel(1);

        let handle = SyncerHandle {
            peers: peers.clone(),
            queue: queue.clone(),
            sync_tx,
        };
        let syncer = Self {
            config,
            store,
            peers,
            queue,
            client,
            sync_rx,
            cancel,
        };
        (syncer, handle)
    }

    /// Drive pushes and catch-up cycles until cancelled.
    pub async fn run(mut self) {
        info!("Syncer started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Syncer closed");
                    return;
                }
                _ = self.queue.wait() => {
                    while let Some((peer, block)) = self.queue.pop() {
                        self.handle_push(peer, block);
                    }
                }
                maybe = self.sync_rx.recv() => {
                    let Some(done) = maybe else { return };
                    self.bulk_sync().await;
                    let _ = done.send(());
                }
            }
        }
    }

    /// Apply one pushed block.
    ///
    /// The push doubles as a status advertisement. A block for the next
    /// expected height is written directly; a higher one only seeds the
    /// status book so a future cycle fetches the gap.
    fn handle_push(&self, peer: PeerId, block: Block) {
        let number = block.number();
        self.peers.observe(
            peer.clone(),
            SyncStatus {
                hash: block.hash(),
                number,
                difficulty: (number as u128) + 1,
            },
        );

        let local = self.store.header().number;
        if number <= local {
            trace!(peer = %peer, number, local, "Stale push ignored");
            return;
        }
        if number > local + 1 {
            debug!(peer = %peer, number, local, "Push ahead of head, status seeded");
            return;
        }

        match self.store.write_blocks(vec![block]) {
            Ok(()) => {
                info!(number, peer = %peer, "Applied pushed block");
            }
            Err(e) => {
                debug!(number, peer = %peer, error = %e, "Pushed block rejected");
            }
        }
    }

    /// One catch-up cycle: repeatedly pick the best remaining peer and
    /// download from it; a peer that misbehaves is dropped from the
    /// candidate set for the rest of the cycle.
    async fn bulk_sync(&self) {
        let mut excluded: HashSet<PeerId> = HashSet::new();

        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let local = self.store.header().number;
            let Some((peer, status)) = self.peers.best_peer(local, &excluded) else {
                debug!(local, "No candidate peer ahead, cycle done");
                return;
            };

            info!(peer = %peer, from = local + 1, to = status.number, "Bulk sync");
            match self.sync_from(&peer, status.number).await {
                Ok(()) => {
                    debug!(peer = %peer, head = self.store.header().number, "Peer range applied");
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Sync attempt failed, dropping peer for this cycle");
                    excluded.insert(peer);
                }
            }
        }
    }

    /// Download `(local, target]` from one peer in ascending chunks.
    async fn sync_from(&self, peer: &PeerId, target: u64) -> Result<(), SyncError> {
        loop {
            let local = self.store.header().number;
            if local >= target {
                return Ok(());
            }

            let headers = get_headers(
                self.client.as_ref(),
                peer,
                local + 1,
                self.config.headers_per_request,
            )
            .await?;
            if headers.is_empty() {
                // The peer advertised a height it cannot serve.
                return Err(SyncError::BadChain("empty header range".into()));
            }
            self.validate_header_chain(&headers)?;

            let hashes: Vec<_> = headers.iter().map(Header::hash).collect();
            let bodies = get_bodies(self.client.as_ref(), peer, &hashes).await?;

            let mut blocks = Vec::with_capacity(headers.len());
            for (header, body) in headers.into_iter().zip(bodies) {
                let Some(body) = body else {
                    return Err(SyncError::MissingBody(header.number));
                };
                blocks.push(Block::new(header, body));
            }

            for batch in blocks.chunks(self.config.write_batch) {
                self.store.write_blocks(batch.to_vec())?;
            }

            debug!(head = self.store.header().number, target, "Chunk applied");
        }
    }

    /// Validate a downloaded header range against the local head: parent
    /// linkage, strictly sequential numbers, non-decreasing timestamps.
    fn validate_header_chain(&self, headers: &[Header]) -> Result<(), SyncError> {
        let mut prev = self.store.header();
        for header in headers {
            if header.number != prev.number + 1 {
                return Err(SyncError::BadChain(format!(
                    "number {} after {}",
                    header.number, prev.number
                )));
            }
            if header.parent_hash != prev.hash() {
                return Err(SyncError::BadChain(format!(
                    "broken parent link at {}",
                    header.number
                )));
            }
            if header.timestamp < prev.timestamp {
                return Err(SyncError::BadChain(format!(
                    "timestamp regressed at {}",
                    header.number
                )));
            }
            prev = header.clone();
        }
        Ok(())
    }
}
