//! Authoritative record of the local chain tip.

use istria_types::{Hash, Header};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// A snapshot of where the local chain is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatus {
    /// Hash of the best-known block.
    pub hash: Hash,
    /// Height of the best-known block.
    pub number: u64,
    /// Cumulative difficulty up to and including the best-known block.
    pub difficulty: u128,
}

impl SyncStatus {
    /// True when `other` is far enough ahead to be worth syncing to.
    pub fn behind(&self, other: &SyncStatus) -> bool {
        other.number > self.number
    }
}

/// Tracks the local [`SyncStatus`], updated by the store on every
/// successful write.
///
/// The height is mirrored in an atomic so hot paths (the IBFT driver's
/// behind-check, metrics) can read it without taking the lock.
#[derive(Debug, Default)]
pub struct StatusTracker {
    inner: RwLock<SyncStatus>,
    number: AtomicU64,
}

impl StatusTracker {
    /// Start tracking from a status.
    pub fn new(status: SyncStatus) -> Self {
        Self {
            number: AtomicU64::new(status.number),
            inner: RwLock::new(status),
        }
    }

    /// Start tracking from a head header.
    pub fn from_head(header: &Header) -> Self {
        Self::new(SyncStatus {
            hash: header.hash(),
            number: header.number,
            difficulty: (header.number as u128) + 1,
        })
    }

    /// Advance to a newly written head.
    pub fn advance(&self, header: &Header) {
        let mut guard = self.inner.write();
        guard.hash = header.hash();
        guard.number = header.number;
        guard.difficulty += header.difficulty.max(1) as u128;
        self.number.store(header.number, Ordering::SeqCst);
        tracing::debug!(number = header.number, hash = ?guard.hash, "Status advanced");
    }

    /// Current snapshot.
    pub fn get(&self) -> SyncStatus {
        *self.inner.read()
    }

    /// Lock-free read of the current height.
    pub fn number(&self) -> u64 {
        self.number.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_updates_snapshot_and_height() {
        let tracker = StatusTracker::default();
        let header = Header {
            number: 7,
            difficulty: 1,
            ..Default::default()
        };
        tracker.advance(&header);

        let snap = tracker.get();
        assert_eq!(snap.number, 7);
        assert_eq!(snap.hash, header.hash());
        assert_eq!(tracker.number(), 7);
    }

    #[test]
    fn difficulty_accumulates() {
        let tracker = StatusTracker::default();
        for n in 1..=3 {
            tracker.advance(&Header {
                number: n,
                difficulty: 1,
                ..Default::default()
            });
        }
        assert_eq!(tracker.get().difficulty, 3);
    }

    #[test]
    fn behind_compares_heights() {
        let local = SyncStatus {
            number: 5,
            ..Default::default()
        };
        let ahead = SyncStatus {
            number: 9,
            ..Default::default()
        };
        assert!(local.behind(&ahead));
        assert!(!ahead.behind(&local));
    }
}
