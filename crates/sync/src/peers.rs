//! Per-peer status book.

use istria_chain::SyncStatus;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Opaque peer identifier, as rendered by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl PeerId {
    /// Wrap a transport-level identifier.
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer's advertised status and when we last heard it.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    /// Advertised chain tip.
    pub status: SyncStatus,
    /// When the advertisement arrived.
    pub updated_at: Instant,
}

/// Tracks every connected peer's advertised [`SyncStatus`].
///
/// The best advertised height is mirrored in an atomic so the consensus
/// driver's behind-check stays lock-free.
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: RwLock<HashMap<PeerId, PeerStatus>>,
    best: AtomicU64,
}

impl PeerBook {
    /// An empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer's advertised status (at connection or on update).
    pub fn observe(&self, peer: PeerId, status: SyncStatus) {
        let mut peers = self.peers.write();
        tracing::debug!(peer = %peer, number = status.number, "Peer status observed");
        peers.insert(
            peer,
            PeerStatus {
                status,
                updated_at: Instant::now(),
            },
        );
        let best = peers.values().map(|p| p.status.number).max().unwrap_or(0);
        self.best.store(best, Ordering::SeqCst);
    }

    /// Drop a disconnected peer.
    pub fn remove(&self, peer: &PeerId) {
        let mut peers = self.peers.write();
        if peers.remove(peer).is_some() {
            tracing::debug!(peer = %peer, "Peer removed");
        }
        let best = peers.values().map(|p| p.status.number).max().unwrap_or(0);
        self.best.store(best, Ordering::SeqCst);
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// True when no peers are tracked.
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Lock-free read of the best advertised height (0 when no peers).
    pub fn best_number(&self) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        Some(self.best.load(Ordering::SeqCst))
    }

    /// The peer with the highest advertised height strictly above
    /// `local_number`, excluding `excluded`. Ties prefer the most recently
    /// updated peer.
    pub fn best_peer(
        &self,
        local_number: u64,
        excluded: &std::collections::HashSet<PeerId>,
    ) -> Option<(PeerId, SyncStatus)> {
        self.peers
            .read()
            .iter()
            .filter(|(id, p)| p.status.number > local_number && !excluded.contains(id))
            .max_by_key(|(_, p)| (p.status.number, p.updated_at))
            .map(|(id, p)| (id.clone(), p.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn status(number: u64) -> SyncStatus {
        SyncStatus {
            number,
            ..Default::default()
        }
    }

    #[test]
    fn best_peer_prefers_highest() {
        let book = PeerBook::new();
        book.observe(PeerId::new("a"), status(5));
        book.observe(PeerId::new("b"), status(9));
        book.observe(PeerId::new("c"), status(7));

        let (id, s) = book.best_peer(0, &HashSet::new()).unwrap();
        assert_eq!(id, PeerId::new("b"));
        assert_eq!(s.number, 9);
        assert_eq!(book.best_number(), Some(9));
    }

    #[test]
    fn best_peer_ignores_peers_at_or_below_local() {
        let book = PeerBook::new();
        book.observe(PeerId::new("a"), status(5));
        assert!(book.best_peer(5, &HashSet::new()).is_none());
        assert!(book.best_peer(4, &HashSet::new()).is_some());
    }

    #[test]
    fn ties_prefer_most_recent() {
        let book = PeerBook::new();
        book.observe(PeerId::new("a"), status(9));
        book.observe(PeerId::new("b"), status(9));

        let (id, _) = book.best_peer(0, &HashSet::new()).unwrap();
        assert_eq!(id, PeerId::new("b"));
    }

    #[test]
    fn excluded_peers_are_skipped() {
        let book = PeerBook::new();
        book.observe(PeerId::new("a"), status(9));
        book.observe(PeerId::new("b"), status(5));

        let mut excluded = HashSet::new();
        excluded.insert(PeerId::new("a"));
        let (id, _) = book.best_peer(0, &excluded).unwrap();
        assert_eq!(id, PeerId::new("b"));
    }

    #[test]
    fn removal_updates_best() {
        let book = PeerBook::new();
        book.observe(PeerId::new("a"), status(9));
        book.observe(PeerId::new("b"), status(5));
        book.remove(&PeerId::new("a"));
        assert_eq!(book.best_number(), Some(5));
        book.remove(&PeerId::new("b"));
        assert_eq!(book.best_number(), None);
    }
}
