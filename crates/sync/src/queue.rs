//! Bounded per-peer queue of pushed blocks.

use crate::PeerId;
use istria_types::Block;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Notify;

/// Work queue fed by the `Notify` endpoint and drained by the [`crate::Syncer`].
///
/// Each peer gets its own bounded lane; when a peer overflows its lane the
/// oldest entry for that peer is dropped, so one flooding peer can neither
/// grow memory nor starve the others.
#[derive(Debug)]
pub struct NotifyQueue {
    lanes: Mutex<HashMap<PeerId, VecDeque<Block>>>,
    capacity: usize,
    wakeup: Notify,
}

impl NotifyQueue {
    /// A queue with the given per-peer bound.
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            wakeup: Notify::new(),
        }
    }

    /// Enqueue a pushed block, dropping the peer's oldest entry on overflow.
    pub fn push(&self, peer: PeerId, block: Block) {
        {
            let mut lanes = self.lanes.lock();
            let lane = lanes.entry(peer.clone()).or_default();
            if lane.len() >= self.capacity {
                lane.pop_front();
                tracing::debug!(peer = %peer, "Notify queue overflow, dropped oldest");
            }
            lane.push_back(block);
        }
        self.wakeup.notify_one();
    }

    /// Take one (peer, block) pair, if any lane is non-empty.
    pub fn pop(&self) -> Option<(PeerId, Block)> {
        let mut lanes = self.lanes.lock();
        let peer = lanes
            .iter()
            .find(|(_, lane)| !lane.is_empty())
            .map(|(peer, _)| peer.clone())?;
        let block = lanes.get_mut(&peer).and_then(VecDeque::pop_front)?;
        lanes.retain(|_, lane| !lane.is_empty());
        Some((peer, block))
    }

    /// Wait until a push arrives. May wake spuriously; callers re-check
    /// with [`NotifyQueue::pop`].
    pub async fn wait(&self) {
        self.wakeup.notified().await;
    }

    /// Total queued blocks across peers.
    pub fn len(&self) -> usize {
        self.lanes.lock().values().map(VecDeque::len).sum()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64) -> Block {
        Block {
            header: istria_types::Header {
                number,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn push_pop_round_trip() {
        let queue = NotifyQueue::new(4);
        queue.push(PeerId::new("a"), block(1));
        let (peer, b) = queue.pop().unwrap();
        assert_eq!(peer, PeerId::new("a"));
        assert_eq!(b.number(), 1);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn overflow_drops_oldest_for_that_peer() {
        let queue = NotifyQueue::new(2);
        for n in 1..=3 {
            queue.push(PeerId::new("a"), block(n));
        }
        // Capacity 2: block 1 was dropped.
        assert_eq!(queue.len(), 2);
        let numbers: Vec<u64> = std::iter::from_fn(|| queue.pop().map(|(_, b)| b.number())).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn one_peer_cannot_starve_another() {
        let queue = NotifyQueue::new(2);
        for n in 1..=10 {
            queue.push(PeerId::new("flood"), block(n));
        }
        queue.push(PeerId::new("quiet"), block(42));

        let mut seen_quiet = false;
        while let Some((peer, _)) = queue.pop() {
            if peer == PeerId::new("quiet") {
                seen_quiet = true;
            }
        }
        assert!(seen_quiet);
        // The flooding peer kept only its bounded lane.
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn wait_wakes_on_push() {
        let queue = std::sync::Arc::new(NotifyQueue::new(2));
        let waiter = queue.clone();
        let task = tokio::spawn(async move {
            waiter.wait().await;
            waiter.pop()
        });
        // Give the waiter a moment to park.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.push(PeerId::new("a"), block(7));

        let popped = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.unwrap().1.number(), 7);
    }
}
