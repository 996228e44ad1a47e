//! Proposal construction, validation and sealing.

use crate::IbftConfig;
use istria_chain::{calc_gas_limit, Blockchain, ExecutionError, Executor, TxPool};
use istria_messages::{commit_seal_digest, ConsensusMessage};
use istria_types::{
    Address, Block, Body, ExtraError, Header, IbftExtra, KeyPair, ValidatorSet,
};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Reasons a proposal is rejected.
#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("proposal does not extend the current head")]
    WrongParent,

    #[error("proposal height {got}, expected {expected}")]
    WrongHeight { got: u64, expected: u64 },

    #[error("timestamp {got} not beyond parent {parent}")]
    TimestampNotIncreasing { got: u64, parent: u64 },

    #[error("gas used {used} exceeds limit {limit}")]
    GasOverLimit { used: u64, limit: u64 },

    #[error("extra data invalid: {0}")]
    Extra(#[from] ExtraError),

    #[error("proposer seal recovered {got}, expected {expected}")]
    WrongProposer { got: Address, expected: Address },

    #[error("validator set in extra does not match the height's set")]
    ValidatorMismatch,

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("state root mismatch after execution")]
    StateRootMismatch,

    #[error("locked on a different proposal")]
    LockedOnOther,

    #[error("committed seals: {valid} distinct validators, need {need}")]
    InsufficientSeals { valid: usize, need: usize },
}

/// Build a block proposal on top of the current head.
///
/// Pops transactions from the pool up to the configured count and the gas
/// budget; anything popped but not included is demoted back. The header is
/// fully executed (state root, gas used, receipts root) and carries the
/// proposer seal in its extra envelope.
pub fn build_proposal(
    key: &KeyPair,
    chain: &dyn Blockchain,
    executor: &dyn Executor,
    pool: &dyn TxPool,
    validators: &ValidatorSet,
    config: &IbftConfig,
) -> Result<Block, ProposalError> {
    let parent = chain.header();

    let gas_limit = calc_gas_limit(parent.gas_limit, config.gas_limit_target);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let timestamp = now.max(parent.timestamp + 1);

    // Drain the pool up to the block budget; return what does not fit.
    let mut transactions = Vec::new();
    let mut gas_budget = gas_limit;
    while transactions.len() < config.max_transactions_per_block {
        let Some(tx) = pool.pop() else { break };
        if tx.gas > gas_budget {
            pool.demote(tx);
            break;
        }
        gas_budget -= tx.gas;
        transactions.push(tx);
    }

    let mut header = Header {
        parent_hash: parent.hash(),
        number: parent.number + 1,
        state_root: parent.state_root,
        tx_root: tx_root(&transactions),
        receipts_root: istria_types::Hash::ZERO,
        miner: key.address(),
        gas_limit,
        gas_used: 0,
        timestamp,
        difficulty: 1,
        extra: IbftExtra::new(validators.as_slice().to_vec()).encode(),
    };

    let outcome = match executor.execute(&parent, &header, &transactions) {
        Ok(outcome) => outcome,
        Err(e) => {
            // Put the transactions back before surfacing the failure.
            for tx in transactions.into_iter().rev() {
                pool.demote(tx);
            }
            return Err(e.into());
        }
    };
    header.state_root = outcome.state_root;
    header.gas_used = outcome.gas_used;
    header.receipts_root = outcome.receipts.root();

    // Seal after the hashed fields are final; the hash excludes the seal
    // itself, so sealing does not perturb the identity being signed.
    let seal = key.sign_digest(&header.hash());
    let mut extra = IbftExtra::decode(&header.extra)?;
    extra.proposer_seal = seal;
    header.extra = extra.encode();

    Ok(Block::new(
        header,
        Body {
            transactions,
            uncles: Vec::new(),
        },
    ))
}

/// Validate a proposal received for the current view.
pub fn validate_proposal(
    block: &Block,
    chain: &dyn Blockchain,
    executor: &dyn Executor,
    validators: &ValidatorSet,
    expected_proposer: Address,
    locked_on: Option<&Block>,
) -> Result<(), ProposalError> {
    let parent = chain.header();
    let header = &block.header;

    if header.number != parent.number + 1 {
        return Err(ProposalError::WrongHeight {
            got: header.number,
            expected: parent.number + 1,
        });
    }
    if header.parent_hash != parent.hash() {
        return Err(ProposalError::WrongParent);
    }
    if header.timestamp <= parent.timestamp {
        return Err(ProposalError::TimestampNotIncreasing {
            got: header.timestamp,
            parent: parent.timestamp,
        });
    }
    if header.gas_used > header.gas_limit {
        return Err(ProposalError::GasOverLimit {
            used: header.gas_used,
            limit: header.gas_limit,
        });
    }

    // Extra envelope: the advertised set must match the height's set and
    // the proposer seal must recover to the expected proposer.
    let extra = IbftExtra::decode(&header.extra)?;
    if extra.validators != validators.as_slice() {
        return Err(ProposalError::ValidatorMismatch);
    }
    let seal = extra.proposer_seal()?;
    let sealer = seal
        .recover(&header.hash())
        .map_err(|_| ProposalError::WrongProposer {
            got: Address::ZERO,
            expected: expected_proposer,
        })?;
    if sealer != expected_proposer {
        return Err(ProposalError::WrongProposer {
            got: sealer,
            expected: expected_proposer,
        });
    }

    // A locked node accepts only the proposal it locked on.
    if let Some(locked) = locked_on {
        if locked.hash() != block.hash() {
            return Err(ProposalError::LockedOnOther);
        }
    }

    // Dry-run against the parent state.
    let outcome = executor.execute(&parent, header, &block.body.transactions)?;
    if outcome.state_root != header.state_root {
        return Err(ProposalError::StateRootMismatch);
    }
    if outcome.gas_used != header.gas_used {
        return Err(ProposalError::GasOverLimit {
            used: outcome.gas_used,
            limit: header.gas_limit,
        });
    }

    Ok(())
}

/// Fold the collected commit seals into the block's extra envelope,
/// checking that at least `2f+1` distinct validators contributed.
pub fn seal_committed<'a>(
    block: &Block,
    commits: impl Iterator<Item = &'a ConsensusMessage>,
    validators: &ValidatorSet,
) -> Result<Block, ProposalError> {
    let hash = block.hash();
    let digest = commit_seal_digest(&hash);

    let mut sealers = Vec::new();
    let mut seals = Vec::new();
    for msg in commits {
        let Ok(seal) = msg.commit_seal() else { continue };
        let Ok(addr) = seal.recover(&digest) else { continue };
        if validators.includes(&addr) && !sealers.contains(&addr) {
            sealers.push(addr);
            seals.push(seal);
        }
    }

    let need = 2 * validators.min_faulty_nodes() + 1;
    if seals.len() < need {
        return Err(ProposalError::InsufficientSeals {
            valid: seals.len(),
            need,
        });
    }

    let mut sealed = block.clone();
    let mut extra = IbftExtra::decode(&sealed.header.extra)?;
    extra.committed_seals = seals;
    sealed.header.extra = extra.encode();
    Ok(sealed)
}

/// Commitment over the ordered transaction list.
fn tx_root(transactions: &[istria_types::Transaction]) -> istria_types::Hash {
    let mut preimage = Vec::new();
    for tx in transactions {
        preimage.extend_from_slice(tx.hash().as_bytes());
    }
    istria_types::keccak256(&preimage)
}
