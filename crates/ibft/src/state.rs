//! Per-height round state.

use istria_messages::{ConsensusMessage, MsgType};
use istria_types::{Address, Block, ValidatorSet, View};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// The five driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IbftState {
    /// Waiting for (or producing) a proposal.
    Accept = 0,
    /// Converging on a new round.
    RoundChange = 1,
    /// Voting on the pending proposal.
    Validate = 2,
    /// Sealing and writing the committed block.
    Commit = 3,
    /// Catching up through the sync service.
    Sync = 4,
}

impl IbftState {
    fn from_u8(v: u8) -> IbftState {
        match v {
            0 => IbftState::Accept,
            1 => IbftState::RoundChange,
            2 => IbftState::Validate,
            3 => IbftState::Commit,
            _ => IbftState::Sync,
        }
    }
}

impl std::fmt::Display for IbftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IbftState::Accept => "AcceptState",
            IbftState::RoundChange => "RoundChangeState",
            IbftState::Validate => "ValidateState",
            IbftState::Commit => "CommitState",
            IbftState::Sync => "SyncState",
        };
        f.write_str(s)
    }
}

/// The externally observable slice of the round state.
///
/// The driver owns [`CurrentState`] exclusively; status endpoints read the
/// state tag and view through this handle without taking any driver lock.
#[derive(Debug, Default)]
pub struct SharedState {
    state: AtomicU8,
    sequence: AtomicU64,
    round: AtomicU64,
}

impl SharedState {
    /// Current state tag.
    pub fn state(&self) -> IbftState {
        IbftState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Current view, assembled from the atomic mirrors.
    pub fn view(&self) -> View {
        View {
            sequence: self.sequence.load(Ordering::SeqCst),
            round: self.round.load(Ordering::SeqCst),
        }
    }

    fn set_state(&self, s: IbftState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    fn set_view(&self, v: View) {
        self.sequence.store(v.sequence, Ordering::SeqCst);
        self.round.store(v.round, Ordering::SeqCst);
    }
}

/// Per-height container for the active proposal, vote tallies, lock status
/// and round-change messages.
///
/// A given address appears at most once per (round, message-type) bucket;
/// the last write wins. Messages from non-validators are never stored.
pub struct CurrentState {
    /// Validator set active at this height.
    validators: ValidatorSet,
    /// Pending proposed block.
    block: Option<Block>,
    /// Proposer selected for the current view.
    proposer: Address,
    /// Current view.
    view: View,
    /// Prepare tally for the current round.
    prepared: HashMap<Address, ConsensusMessage>,
    /// Commit tally for the current round.
    committed: HashMap<Address, ConsensusMessage>,
    /// RoundChange messages, bucketed by target round.
    round_messages: BTreeMap<u64, HashMap<Address, ConsensusMessage>>,
    /// Whether the node is locked on the pending proposal.
    locked: bool,
    /// One-shot error slot, consumed by [`CurrentState::take_err`].
    err: Option<crate::DriverError>,
    /// Atomic mirrors for non-owning readers.
    shared: Arc<SharedState>,
}

impl CurrentState {
    /// Fresh state with empty tallies.
    pub fn new(validators: ValidatorSet) -> Self {
        Self {
            validators,
            block: None,
            proposer: Address::ZERO,
            view: View::default(),
            prepared: HashMap::new(),
            committed: HashMap::new(),
            round_messages: BTreeMap::new(),
            locked: false,
            err: None,
            shared: Arc::new(SharedState::default()),
        }
    }

    /// Handle for status endpoints.
    pub fn shared(&self) -> Arc<SharedState> {
        self.shared.clone()
    }

    // ── state tag ─────────────────────────────────────────────────────────

    /// Atomic read of the state tag.
    pub fn state(&self) -> IbftState {
        self.shared.state()
    }

    /// Atomic write of the state tag.
    pub fn set_state(&self, s: IbftState) {
        self.shared.set_state(s);
    }

    // ── view ──────────────────────────────────────────────────────────────

    /// Current view.
    pub fn view(&self) -> View {
        self.view
    }

    /// Move to a view, mirroring it for external readers.
    pub fn set_view(&mut self, v: View) {
        self.view = v;
        self.shared.set_view(v);
    }

    // ── validators & proposer ─────────────────────────────────────────────

    /// The validator set at this height.
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Replace the validator set (on height change).
    pub fn set_validators(&mut self, validators: ValidatorSet) {
        self.validators = validators;
    }

    /// Select and remember the proposer for the current round.
    pub fn calc_proposer(&mut self, last_proposer: Address) {
        self.proposer = self.validators.calc_proposer(self.view.round, last_proposer);
    }

    /// The proposer selected for the current view.
    pub fn proposer(&self) -> Address {
        self.proposer
    }

    // ── proposal & lock ───────────────────────────────────────────────────

    /// The pending proposal, if any.
    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    /// Set the pending proposal.
    pub fn set_block(&mut self, block: Block) {
        self.block = Some(block);
    }

    /// Lock onto the pending proposal.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Clear the lock and discard the pending proposal.
    pub fn unlock(&mut self) {
        self.block = None;
        self.locked = false;
    }

    /// Whether the node is locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    // ── error slot ────────────────────────────────────────────────────────

    /// Record an in-state error for the next consumer.
    pub fn set_err(&mut self, err: crate::DriverError) {
        self.err = Some(err);
    }

    /// Consume the error slot.
    pub fn take_err(&mut self) -> Option<crate::DriverError> {
        self.err.take()
    }

    // ── tallies ───────────────────────────────────────────────────────────

    /// Number of messages required beyond which a quorum exists: 2f.
    /// The driver's thresholds are strict comparisons against this.
    pub fn num_valid(&self) -> usize {
        2 * self.validators.min_faulty_nodes()
    }

    /// Add a RoundChange message and return the size of its round bucket.
    /// Non-RoundChange messages are ignored and count as zero.
    pub fn add_round_message(&mut self, msg: ConsensusMessage, from: Address) -> usize {
        if msg.msg_type != MsgType::RoundChange {
            return 0;
        }
        let round = msg.view.round;
        self.add_message(msg, from);
        self.round_messages.get(&round).map_or(0, |m| m.len())
    }

    /// Add a Prepare message to the tally.
    pub fn add_prepared(&mut self, msg: ConsensusMessage, from: Address) {
        if msg.msg_type != MsgType::Prepare {
            return;
        }
        self.add_message(msg, from);
    }

    /// Add a Commit message to the tally.
    pub fn add_committed(&mut self, msg: ConsensusMessage, from: Address) {
        if msg.msg_type != MsgType::Commit {
            return;
        }
        self.add_message(msg, from);
    }

    /// Dispatch a message into the matching bucket. Messages from addresses
    /// outside the validator set are silently dropped.
    pub fn add_message(&mut self, msg: ConsensusMessage, from: Address) {
        if !self.validators.includes(&from) {
            tracing::trace!(from = ?from, msg_type = %msg.msg_type, "Dropping non-validator message");
            return;
        }

        match msg.msg_type {
            MsgType::Commit => {
                self.committed.insert(from, msg);
            }
            MsgType::Prepare => {
                self.prepared.insert(from, msg);
            }
            MsgType::RoundChange => {
                self.round_messages
                    .entry(msg.view.round)
                    .or_default()
                    .insert(from, msg);
            }
            MsgType::Preprepare => {}
        }
    }

    /// Size of the Prepare tally.
    pub fn num_prepared(&self) -> usize {
        self.prepared.len()
    }

    /// Size of the Commit tally.
    pub fn num_committed(&self) -> usize {
        self.committed.len()
    }

    /// The Commit messages collected so far.
    pub fn committed_messages(&self) -> impl Iterator<Item = &ConsensusMessage> {
        self.committed.values()
    }

    /// Size of one round-change bucket.
    pub fn num_round_messages(&self, round: u64) -> usize {
        self.round_messages.get(&round).map_or(0, |m| m.len())
    }

    /// Greatest round backed by at least f+1 round-change messages; the
    /// weak-certificate threshold for round catch-up.
    pub fn max_round(&self) -> Option<u64> {
        let need = self.validators.min_faulty_nodes() + 1;
        self.round_messages
            .iter()
            .filter(|(_, msgs)| msgs.len() >= need)
            .map(|(round, _)| *round)
            .max()
    }

    /// Drop one round's bucket after advancing past it.
    pub fn clean_round(&mut self, round: u64) {
        self.round_messages.remove(&round);
    }

    /// Reset every tally; the only other way tallies shrink is
    /// [`CurrentState::clean_round`].
    pub fn reset_round_msgs(&mut self) {
        self.prepared.clear();
        self.committed.clear();
        self.round_messages.clear();
    }
}

impl std::fmt::Debug for CurrentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentState")
            .field("state", &self.state().to_string())
            .field("view", &self.view)
            .field("proposer", &self.proposer)
            .field("validators", &self.validators.len())
            .field("prepared", &self.prepared.len())
            .field("committed", &self.committed.len())
            .field("locked", &self.locked)
            .finish()
    }
}
