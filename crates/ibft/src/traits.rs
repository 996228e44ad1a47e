//! Collaborator contracts of the driver.

use istria_messages::ConsensusMessage;
use istria_types::Block;
use tokio::sync::oneshot;

/// Delivery of consensus messages to the rest of the validator set.
///
/// Best-effort broadcast; the driver tallies its own messages locally, so
/// implementations only need to reach the peers.
pub trait ConsensusTransport: Send + Sync {
    /// Broadcast a signed message to all peers.
    fn broadcast(&self, msg: ConsensusMessage);
}

/// What the driver needs from the sync service.
pub trait SyncFacade: Send + Sync {
    /// Height advertised by the best peer, if any peer is known.
    fn best_peer_number(&self) -> Option<u64>;

    /// Ask the syncer to run a catch-up cycle. The returned channel
    /// resolves when the local chain has reached the network's best height
    /// (or the cycle gave up and the caller should re-evaluate).
    fn begin_sync(&self) -> oneshot::Receiver<()>;

    /// Announce a freshly sealed block to the peers.
    fn announce(&self, block: Block);
}
