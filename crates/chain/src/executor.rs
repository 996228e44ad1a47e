//! The execution contract.

use istria_types::{Header, Receipt, Receipts, Transaction};
use thiserror::Error;

/// Errors surfaced by the executor.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("transaction {index} failed: {reason}")]
    Transaction { index: usize, reason: String },

    #[error("block gas limit exceeded: used {used}, limit {limit}")]
    GasLimitExceeded { used: u64, limit: u64 },

    #[error("state for parent root not available")]
    MissingParentState,
}

/// Result of executing a block's transactions against the parent state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// State root after execution.
    pub state_root: istria_types::Hash,
    /// Total gas consumed.
    pub gas_used: u64,
    /// One receipt per transaction, in order.
    pub receipts: Receipts,
}

/// Transforms (parent state root, header, ordered transactions) into
/// (new state root, gas used, receipts).
///
/// The core uses this for proposal dry-runs; the semantics of execution
/// itself are the collaborator's concern.
pub trait Executor: Send + Sync {
    /// Execute `transactions` under `header` against `parent`'s state.
    fn execute(
        &self,
        parent: &Header,
        header: &Header,
        transactions: &[Transaction],
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// An executor that charges a flat per-transaction gas cost and folds the
/// inputs into a deterministic state root. Enough for tests and for chains
/// whose execution engine lives elsewhere.
#[derive(Debug, Clone, Default)]
pub struct NoopExecutor {
    /// Gas charged per transaction.
    pub gas_per_tx: u64,
}

impl NoopExecutor {
    /// Flat 21k gas per transaction.
    pub fn new() -> Self {
        Self { gas_per_tx: 21_000 }
    }
}

impl Executor for NoopExecutor {
    fn execute(
        &self,
        parent: &Header,
        header: &Header,
        transactions: &[Transaction],
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let gas_used = self.gas_per_tx * transactions.len() as u64;
        if gas_used > header.gas_limit {
            return Err(ExecutionError::GasLimitExceeded {
                used: gas_used,
                limit: header.gas_limit,
            });
        }

        let mut receipts = Vec::with_capacity(transactions.len());
        let mut cumulative = 0u64;
        for tx in transactions {
            cumulative += self.gas_per_tx;
            receipts.push(Receipt {
                success: true,
                cumulative_gas_used: cumulative,
                gas_used: self.gas_per_tx,
                tx_hash: tx.hash(),
                logs: Vec::new(),
            });
        }

        // Deterministic root: fold the parent root with the tx hashes.
        let mut preimage = parent.state_root.as_bytes().to_vec();
        for tx in transactions {
            preimage.extend_from_slice(tx.hash().as_bytes());
        }

        Ok(ExecutionOutcome {
            state_root: istria_types::keccak256(&preimage),
            gas_used,
            receipts: Receipts(receipts),
        })
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
    fn execution_is_deterministic() {
        let exec = NoopExecutor::new();
        let parent = Header::default();
        let header = Header {
            number: 1,
            gas_limit: 1_000_000,
            ..Default::default()
        };
        let txs = vec![tx(0), tx(1)];

        let a = exec.execute(&parent, &header, &txs).unwrap();
        let b = exec.execute(&parent, &header, &txs).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.gas_used, 42_000);
        assert_eq!(a.receipts.len(), 2);
    }

    #[test]
    fn gas_limit_is_enforced() {
        let exec = NoopExecutor::new();
        let parent = Header::default();
        let header = Header {
            number: 1,
            gas_limit: 30_000,
            ..Default::default()
        };
        let err = exec.execute(&parent, &header, &[tx(0), tx(1)]).unwrap_err();
        assert!(matches!(err, ExecutionError::GasLimitExceeded { .. }));
    }
}
