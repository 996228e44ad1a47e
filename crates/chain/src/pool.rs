//! The transaction pool contract.

use istria_types::Transaction;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Transaction source for block building.
///
/// The driver pops transactions while assembling a proposal and returns the
/// ones it could not fit (or that a failed round left behind) through
/// [`TxPool::demote`], so nothing is lost when a proposal is abandoned.
pub trait TxPool: Send + Sync {
    /// Take the next pending transaction, if any.
    fn pop(&self) -> Option<Transaction>;

    /// Return a transaction to the pool front.
    fn demote(&self, tx: Transaction);

    /// Number of pending transactions.
    fn len(&self) -> usize;

    /// True when no transactions are pending.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A minimal FIFO pool.
#[derive(Debug, Default)]
pub struct FifoPool {
    queue: Mutex<VecDeque<Transaction>>,
}

impl FifoPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction to the back of the queue.
    pub fn push(&self, tx: Transaction) {
        self.queue.lock().push_back(tx);
    }
}

impl TxPool for FifoPool {
    fn pop(&self) -> Option<Transaction> {
        self.queue.lock().pop_front()
    }

    fn demote(&self, tx: Transaction) {
        self.queue.lock().push_front(tx);
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(nonce: u64) -> Transaction {
        Transaction {
            nonce,
            gas: 21_000,
            to: None,
            value: 0,
            input: vec![],
            signature: vec![],
        }
    }

    #[test]
    fn pop_is_fifo() {
        let pool = FifoPool::new();
        pool.push(tx(1));
        pool.push(tx(2));
        assert_eq!(pool.pop().unwrap().nonce, 1);
        assert_eq!(pool.pop().unwrap().nonce, 2);
        assert!(pool.pop().is_none());
    }

    #[test]
    fn demote_returns_to_front() {
        let pool = FifoPool::new();
        pool.push(tx(1));
        pool.push(tx(2));
        let first = pool.pop().unwrap();
        pool.demote(first);
        assert_eq!(pool.pop().unwrap().nonce, 1);
    }
}
