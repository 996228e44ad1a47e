//! The IBFT driver task.

use crate::proposal::{build_proposal, seal_committed, validate_proposal};
use crate::state::{CurrentState, IbftState, SharedState};
use crate::traits::{ConsensusTransport, SyncFacade};
use crate::{IbftConfig, ProposalError};
use istria_chain::{Blockchain, Executor, StoreError, TxPool};
use istria_messages::{commit_seal_digest, ConsensusMessage, MsgType};
use istria_types::{Address, Block, IbftExtra, KeyPair, ValidatorSet, View};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Errors surfaced by the driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Cancellation was requested; the driver drained and exited.
    #[error("driver closed")]
    Closed,

    /// Writing a sealed block failed. Irrecoverable: local consensus
    /// liveness is broken.
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    /// A proposal failed validation.
    #[error("invalid proposal: {0}")]
    Proposal(#[from] ProposalError),

    /// A Preprepare payload could not be decoded, or the pending proposal
    /// went missing where one was required.
    #[error("proposal payload undecodable")]
    BadPayload,
}

/// What a state handler wakes up to.
enum Wake {
    /// An authenticated message for the current height.
    Msg(ConsensusMessage, Address),
    /// The state timer fired.
    Timeout,
    /// A Preprepare referenced a future height; the node is behind.
    Behind,
    /// Cancellation was requested.
    Closed,
}

/// The IBFT driver.
///
/// Owns the [`CurrentState`] exclusively and runs as a dedicated task; see
/// the crate docs for the state machine. External observers read the state
/// tag and view through [`Ibft::shared`].
pub struct Ibft {
    key: KeyPair,
    config: IbftConfig,
    chain: Arc<dyn Blockchain>,
    executor: Arc<dyn Executor>,
    pool: Arc<dyn TxPool>,
    transport: Arc<dyn ConsensusTransport>,
    sync: Arc<dyn SyncFacade>,
    msg_rx: mpsc::Receiver<ConsensusMessage>,
    cancel: CancellationToken,
    state: CurrentState,
    /// Same-height messages for rounds ahead of ours, replayed when the
    /// round catches up. Bounded; the oldest entry is dropped on overflow.
    future_msgs: VecDeque<(ConsensusMessage, Address)>,
}

impl Ibft {
    /// Build a driver over its collaborators.
    ///
    /// The validator set is bootstrapped from the extra envelope of the
    /// current head; a head without one yields an empty set and the driver
    /// observes until the chain provides a set that includes this node.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: KeyPair,
        config: IbftConfig,
        chain: Arc<dyn Blockchain>,
        executor: Arc<dyn Executor>,
        pool: Arc<dyn TxPool>,
        transport: Arc<dyn ConsensusTransport>,
        sync: Arc<dyn SyncFacade>,
        msg_rx: mpsc::Receiver<ConsensusMessage>,
        cancel: CancellationToken,
    ) -> Self {
        let state = CurrentState::new(ValidatorSet::new());
        let mut driver = Self {
            key,
            config,
            chain,
            executor,
            pool,
            transport,
            sync,
            msg_rx,
            cancel,
            state,
            future_msgs: VecDeque::new(),
        };
        driver.prepare_height();
        driver
    }

    /// Handle for status endpoints: atomic state tag and view.
    pub fn shared(&self) -> Arc<SharedState> {
        self.state.shared()
    }

    /// Run until cancelled or a fatal storage error.
    pub async fn run(mut self) -> Result<(), DriverError> {
        info!(address = %self.key.address(), "IBFT driver started");

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }
            // The propose→prepare→commit cycle has no suspension point when
            // the node is its own quorum (n = 1); yield so co-located tasks
            // keep running.
            tokio::task::yield_now().await;

            let outcome = match self.state.state() {
                IbftState::Accept => self.run_accept_state().await,
                IbftState::Validate => self.run_validate_state().await,
                IbftState::RoundChange => self.run_round_change_state().await,
                IbftState::Commit => self.run_commit_state(),
                IbftState::Sync => self.run_sync_state().await,
            };

            match outcome {
                Ok(()) => continue,
                Err(DriverError::Closed) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(()) => info!("IBFT driver closed"),
            Err(e) => warn!(error = %e, "IBFT driver stopped"),
        }
        result
    }

    // ── states ────────────────────────────────────────────────────────────

    async fn run_accept_state(&mut self) -> Result<(), DriverError> {
        if self.detect_behind() {
            self.state.set_state(IbftState::Sync);
            return Ok(());
        }
        if !self.is_validator() {
            debug!("Not in the validator set, observing");
            self.state.set_state(IbftState::Sync);
            return Ok(());
        }

        let head = self.chain.header();
        let last_proposer = if head.number == 0 {
            Address::ZERO
        } else {
            head.miner
        };
        self.state.calc_proposer(last_proposer);

        let view = self.state.view();
        debug!(
            sequence = view.sequence,
            round = view.round,
            proposer = %self.state.proposer(),
            "Accept state"
        );

        if self.state.proposer() == self.key.address() {
            // A locked node may only re-propose the proposal it locked on.
            let block = if self.state.is_locked() {
                match self.state.block().cloned() {
                    Some(block) => block,
                    None => {
                        self.state.set_err(DriverError::BadPayload);
                        self.state.set_state(IbftState::RoundChange);
                        return Ok(());
                    }
                }
            } else {
                match build_proposal(
                    &self.key,
                    self.chain.as_ref(),
                    self.executor.as_ref(),
                    self.pool.as_ref(),
                    self.state.validators(),
                    &self.config,
                ) {
                    Ok(block) => block,
                    Err(e) => {
                        warn!(error = %e, "Failed to build proposal");
                        self.state.set_err(e.into());
                        self.state.set_state(IbftState::RoundChange);
                        return Ok(());
                    }
                }
            };

            info!(
                sequence = view.sequence,
                round = view.round,
                hash = ?block.hash(),
                transactions = block.body.transactions.len(),
                "Proposing block"
            );

            self.state.set_block(block.clone());
            let msg = ConsensusMessage::preprepare(&self.key, view, block.encode());
            self.broadcast(msg);
            self.state.set_state(IbftState::Validate);
            return Ok(());
        }

        // Wait for the expected proposer's Preprepare.
        let deadline = Instant::now() + self.config.round_timeout(view.round);
        loop {
            match self.next_wake(deadline).await {
                Wake::Closed => return Err(DriverError::Closed),
                Wake::Behind => {
                    self.state.set_state(IbftState::Sync);
                    return Ok(());
                }
                Wake::Timeout => {
                    debug!(round = view.round, "Accept state timed out");
                    self.state.set_state(IbftState::RoundChange);
                    return Ok(());
                }
                Wake::Msg(msg, from) => match msg.msg_type {
                    MsgType::Preprepare => {
                        if from != self.state.proposer() {
                            warn!(from = %from, "Preprepare from unexpected sender");
                            continue;
                        }
                        if msg.view != view {
                            continue;
                        }
                        let Ok(block) = Block::decode(&msg.payload) else {
                            warn!(from = %from, "Undecodable proposal payload");
                            self.state.set_err(DriverError::BadPayload);
                            self.state.set_state(IbftState::RoundChange);
                            return Ok(());
                        };
                        match validate_proposal(
                            &block,
                            self.chain.as_ref(),
                            self.executor.as_ref(),
                            self.state.validators(),
                            self.state.proposer(),
                            self.state.is_locked().then(|| self.state.block()).flatten(),
                        ) {
                            Ok(()) => {
                                debug!(hash = ?block.hash(), "Proposal accepted");
                                self.state.set_block(block);
                                self.state.set_state(IbftState::Validate);
                                return Ok(());
                            }
                            Err(e) => {
                                warn!(error = %e, "Proposal rejected");
                                self.state.set_err(e.into());
                                self.state.set_state(IbftState::RoundChange);
                                return Ok(());
                            }
                        }
                    }
                    // Early votes for this view are tallied for later.
                    _ => self.state.add_message(msg, from),
                },
            }
        }
    }

    async fn run_validate_state(&mut self) -> Result<(), DriverError> {
        let view = self.state.view();
        self.broadcast(ConsensusMessage::prepare(&self.key, view));

        let deadline = Instant::now() + self.config.round_timeout(view.round);
        loop {
            // Threshold checks run before each wait so that own votes (and
            // votes collected while still in Accept) count immediately.
            if !self.state.is_locked() && self.state.num_prepared() > self.state.num_valid() {
                info!(
                    sequence = view.sequence,
                    round = view.round,
                    prepared = self.state.num_prepared(),
                    "Prepared quorum reached, locking"
                );
                self.state.lock();
                let hash = match self.state.block() {
                    Some(block) => block.hash(),
                    None => {
                        self.state.set_err(DriverError::BadPayload);
                        self.state.set_state(IbftState::RoundChange);
                        return Ok(());
                    }
                };
                self.broadcast(ConsensusMessage::commit(&self.key, view, &hash));
            }

            if self.state.num_committed() > self.state.num_valid() {
                debug!(
                    committed = self.state.num_committed(),
                    "Committed quorum reached"
                );
                self.state.set_state(IbftState::Commit);
                return Ok(());
            }

            match self.next_wake(deadline).await {
                Wake::Closed => return Err(DriverError::Closed),
                Wake::Behind => {
                    self.state.set_state(IbftState::Sync);
                    return Ok(());
                }
                Wake::Timeout => {
                    debug!(round = view.round, "Validate state timed out");
                    self.state.set_state(IbftState::RoundChange);
                    return Ok(());
                }
                Wake::Msg(msg, from) => match msg.msg_type {
                    MsgType::Prepare => self.state.add_prepared(msg, from),
                    MsgType::Commit => {
                        // Only commits whose seal signs our proposal count.
                        if let Some(block) = self.state.block() {
                            let digest = commit_seal_digest(&block.hash());
                            let sealed_by = msg
                                .commit_seal()
                                .ok()
                                .and_then(|seal| seal.recover(&digest).ok());
                            if sealed_by != Some(from) {
                                warn!(from = %from, "Commit seal mismatch, dropping");
                                continue;
                            }
                        }
                        self.state.add_committed(msg, from);
                    }
                    MsgType::RoundChange => {
                        self.state.add_round_message(msg, from);
                    }
                    MsgType::Preprepare => {
                        // A second, different proposal from the proposer for
                        // the same view is equivocation.
                        if from == self.state.proposer() && msg.view == view {
                            let ours = self.state.block().map(Block::hash);
                            let theirs = Block::decode(&msg.payload).ok().map(|b| b.hash());
                            if theirs.is_some() && ours != theirs {
                                warn!(proposer = %from, "Proposer equivocation detected");
                                self.state.set_err(DriverError::BadPayload);
                                self.state.set_state(IbftState::RoundChange);
                                return Ok(());
                            }
                        }
                    }
                },
            }
        }
    }

    fn run_commit_state(&mut self) -> Result<(), DriverError> {
        let view = self.state.view();
        let Some(block) = self.state.block().cloned() else {
            self.state.set_err(DriverError::BadPayload);
            self.state.set_state(IbftState::RoundChange);
            return Ok(());
        };

        let sealed = match seal_committed(
            &block,
            self.state.committed_messages(),
            self.state.validators(),
        ) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(error = %e, "Commit seal assembly failed");
                self.state.set_err(e.into());
                self.state.set_state(IbftState::RoundChange);
                return Ok(());
            }
        };

        // Storage failure here is fatal: the height cannot move on.
        self.chain.write_blocks(vec![sealed.clone()])?;

        info!(
            sequence = view.sequence,
            round = view.round,
            hash = ?sealed.hash(),
            "Block committed"
        );

        self.sync.announce(sealed);
        self.prepare_height();
        self.state.set_state(IbftState::Accept);
        Ok(())
    }

    async fn run_round_change_state(&mut self) -> Result<(), DriverError> {
        // Entry: an in-state error means we initiated the change; otherwise
        // catch up with any round already backed by a weak certificate, or
        // fall back to the next round (or to sync when a peer is ahead).
        if let Some(err) = self.state.take_err() {
            debug!(error = %err, "Round change due to error");
            let next = self.state.view().round + 1;
            self.send_round_change(next);
        } else {
            match self.state.max_round() {
                Some(max) if max > self.state.view().round => self.send_round_change(max),
                _ => {
                    if self.detect_behind() {
                        self.state.set_state(IbftState::Sync);
                        return Ok(());
                    }
                    let next = self.state.view().round + 1;
                    self.send_round_change(next);
                }
            }
        }

        let weak = self.state.validators().min_faulty_nodes() + 1;
        let mut deadline =
            Instant::now() + self.config.round_timeout(self.state.view().round);

        while self.state.state() == IbftState::RoundChange {
            match self.next_wake(deadline).await {
                Wake::Closed => return Err(DriverError::Closed),
                Wake::Behind => {
                    self.state.set_state(IbftState::Sync);
                    return Ok(());
                }
                Wake::Timeout => {
                    if self.detect_behind() {
                        self.state.set_state(IbftState::Sync);
                        return Ok(());
                    }
                    let next = self.state.view().round + 1;
                    debug!(round = next, "Round change timed out, moving on");
                    self.send_round_change(next);
                    deadline =
                        Instant::now() + self.config.round_timeout(self.state.view().round);
                }
                Wake::Msg(msg, from) => {
                    if msg.msg_type != MsgType::RoundChange {
                        continue;
                    }
                    let msg_round = msg.view.round;
                    let num = self.state.add_round_message(msg, from);

                    if num > self.state.num_valid() {
                        // Quorum for the target round: adopt it.
                        info!(round = msg_round, "Round change quorum reached");
                        let mut view = self.state.view();
                        view.round = msg_round;
                        self.state.set_view(view);
                        self.state.reset_round_msgs();
                        self.state.set_state(IbftState::Accept);
                    } else if num == weak && self.state.view().round < msg_round {
                        // Weak certificate: fast-forward.
                        let target = self.state.max_round().unwrap_or(msg_round);
                        debug!(round = target, "Weak certificate, fast-forwarding");
                        self.send_round_change(target);
                        deadline = Instant::now()
                            + self.config.round_timeout(self.state.view().round);
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_sync_state(&mut self) -> Result<(), DriverError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(DriverError::Closed);
            }

            if self.detect_behind() {
                info!(
                    local = self.chain.header().number,
                    best = self.sync.best_peer_number().unwrap_or(0),
                    "Behind the network, syncing"
                );
                let done = self.sync.begin_sync();
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(DriverError::Closed),
                    _ = done => {}
                }
                self.prepare_height();
                continue;
            }

            if self.is_validator() {
                self.prepare_height();
                self.state.set_state(IbftState::Accept);
                return Ok(());
            }

            // Observer: wait for the chain to move and re-derive the set.
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DriverError::Closed),
                _ = tokio::time::sleep(self.config.observe_interval) => {}
            }
            self.prepare_height();
        }
    }

    // ── plumbing ──────────────────────────────────────────────────────────

    /// Reset the round state for the height above the current head:
    /// fresh view at round 0, validator set from the head's extra envelope,
    /// cleared tallies and lock.
    fn prepare_height(&mut self) {
        let head = self.chain.header();
        if let Ok(extra) = IbftExtra::decode(&head.extra) {
            self.state
                .set_validators(ValidatorSet::from_addresses(extra.validators));
        }
        self.state.set_view(View::for_height(head.number + 1));
        self.state.unlock();
        self.state.reset_round_msgs();
        self.future_msgs
            .retain(|(m, _)| m.view.sequence == head.number + 1);
    }

    fn is_validator(&self) -> bool {
        self.state.validators().includes(&self.key.address())
    }

    /// True when a peer's advertised height is meaningfully past ours.
    fn detect_behind(&self) -> bool {
        let local = self.chain.header().number;
        self.sync
            .best_peer_number()
            .is_some_and(|best| best > local + self.config.sync_trigger_depth)
    }

    /// Tally our own message, then hand it to the transport.
    fn broadcast(&mut self, msg: ConsensusMessage) {
        if msg.msg_type != MsgType::Preprepare {
            self.state.add_message(msg.clone(), self.key.address());
        }
        self.transport.broadcast(msg);
    }

    /// Move to `round`, clear that round's stale bucket, and broadcast our
    /// RoundChange for it.
    fn send_round_change(&mut self, round: u64) {
        let mut view = self.state.view();
        view.round = round;
        self.state.set_view(view);
        self.state.clean_round(round);
        debug!(round, "Broadcasting round change");
        self.broadcast(ConsensusMessage::round_change(&self.key, view));
    }

    /// Wait for the next relevant message, the deadline, or cancellation.
    ///
    /// Messages are authenticated here (sender recovered from the
    /// signature); stale ones are dropped, same-height future-round ones
    /// are buffered, and a future-height Preprepare reports `Behind`.
    async fn next_wake(&mut self, deadline: Instant) -> Wake {
        loop {
            let current = self.state.view();

            // Replay buffered messages that became current.
            let buffered = self
                .future_msgs
                .iter()
                .position(|(m, _)| {
                    m.view.sequence == current.sequence
                        && (m.view.round <= current.round
                            || m.msg_type == MsgType::RoundChange)
                })
                .and_then(|pos| self.future_msgs.remove(pos));
            if let Some((msg, from)) = buffered {
                return Wake::Msg(msg, from);
            }

            let received = tokio::select! {
                _ = self.cancel.cancelled() => return Wake::Closed,
                _ = sleep_until(deadline) => return Wake::Timeout,
                maybe = self.msg_rx.recv() => match maybe {
                    Some(msg) => msg,
                    None => return Wake::Closed,
                },
            };

            let Ok(from) = received.from_addr() else {
                warn!("Dropping message with unrecoverable sender");
                continue;
            };

            let view = received.view;
            if view.sequence < current.sequence {
                trace!(view = %view, "Dropping stale message");
                continue;
            }
            if view.sequence > current.sequence {
                // One height ahead is routine while this node finishes the
                // commit below it; buffer and replay after the height turn.
                // Further ahead means the chain has moved without us.
                if received.msg_type == MsgType::Preprepare
                    && view.sequence > current.sequence + 1
                {
                    debug!(view = %view, "Preprepare far ahead of local height");
                    return Wake::Behind;
                }
                self.buffer_future(received, from);
                continue;
            }
            // Same height. RoundChange messages are deliverable for any
            // round; other types only for the current round.
            if received.msg_type != MsgType::RoundChange {
                if view.round > current.round {
                    self.buffer_future(received, from);
                    continue;
                }
                if view.round < current.round {
                    trace!(view = %view, "Dropping past-round message");
                    continue;
                }
            }
            return Wake::Msg(received, from);
        }
    }

    /// Keep a message that is ahead of the current view for later replay.
    fn buffer_future(&mut self, msg: ConsensusMessage, from: Address) {
        if self.future_msgs.len() >= self.config.message_buffer {
            self.future_msgs.pop_front();
        }
        self.future_msgs.push_back((msg, from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istria_chain::{FifoPool, InMemoryChain, NoopExecutor};
    use istria_types::test_utils::test_validators;
    use istria_types::Header;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct TestTransport {
        sent: Mutex<Vec<ConsensusMessage>>,
    }

    impl TestTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent_of(&self, msg_type: MsgType) -> Vec<ConsensusMessage> {
            self.sent
                .lock()
                .iter()
                .filter(|m| m.msg_type == msg_type)
                .cloned()
                .collect()
        }
    }

    impl ConsensusTransport for TestTransport {
        fn broadcast(&self, msg: ConsensusMessage) {
            self.sent.lock().push(msg);
        }
    }

    struct TestSync;

    impl SyncFacade for TestSync {
        fn best_peer_number(&self) -> Option<u64> {
            None
        }

        fn begin_sync(&self) -> oneshot::Receiver<()> {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(());
            rx
        }

        fn announce(&self, _block: Block) {}
    }

    struct Fixture {
        keys: Vec<KeyPair>,
        set: ValidatorSet,
        chain: Arc<InMemoryChain>,
        transport: Arc<TestTransport>,
        msg_tx: mpsc::Sender<ConsensusMessage>,
        cancel: CancellationToken,
        shared: Arc<SharedState>,
        handle: tokio::task::JoinHandle<Result<(), DriverError>>,
    }

    fn genesis_for(set: &ValidatorSet) -> Header {
        Header {
            gas_limit: 8_000_000,
            extra: IbftExtra::new(set.as_slice().to_vec()).encode(),
            ..Default::default()
        }
    }

    fn spawn_driver(n: u8, me: usize, timeout: Duration) -> Fixture {
        let (keys, set) = test_validators(n);
        let chain = Arc::new(InMemoryChain::with_genesis(genesis_for(&set)));
        let transport = TestTransport::new();
        let (msg_tx, msg_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let driver = Ibft::new(
            keys[me].clone(),
            IbftConfig::default().with_base_round_timeout(timeout),
            chain.clone(),
            Arc::new(NoopExecutor::new()),
            Arc::new(FifoPool::new()),
            transport.clone(),
            Arc::new(TestSync),
            msg_rx,
            cancel.clone(),
        );
        let shared = driver.shared();
        let handle = tokio::spawn(driver.run());

        Fixture {
            keys,
            set,
            chain,
            transport,
            msg_tx,
            cancel,
            shared,
            handle,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn single_validator_seals_blocks() {
        let fx = spawn_driver(1, 0, Duration::from_secs(2));

        // n = 1 → threshold 1: the node's own votes seal each height.
        let chain = fx.chain.clone();
        wait_until(move || chain.header().number >= 2).await;

        fx.cancel.cancel();
        fx.handle.await.unwrap().unwrap();

        let head = fx.chain.header();
        let extra = IbftExtra::decode(&head.extra).unwrap();
        assert_eq!(extra.committed_seals.len(), 1);
        assert_eq!(head.miner, fx.keys[0].address());
    }

    #[tokio::test]
    async fn follower_commits_with_quorum() {
        // Validator 0 proposes at (1, 0); we run validator 1.
        let fx = spawn_driver(4, 1, Duration::from_secs(5));
        let view = View::new(1, 0);

        let proposal = build_proposal(
            &fx.keys[0],
            fx.chain.as_ref(),
            &NoopExecutor::new(),
            &FifoPool::new(),
            &fx.set,
            &IbftConfig::default(),
        )
        .unwrap();
        let hash = proposal.hash();

        fx.msg_tx
            .send(ConsensusMessage::preprepare(
                &fx.keys[0],
                view,
                proposal.encode(),
            ))
            .await
            .unwrap();

        // Our own Prepare plus two peers reach 2f+1 = 3.
        for k in [0, 2] {
            fx.msg_tx
                .send(ConsensusMessage::prepare(&fx.keys[k], view))
                .await
                .unwrap();
        }

        let transport = fx.transport.clone();
        wait_until(move || !transport.sent_of(MsgType::Commit).is_empty()).await;

        // Commits from three peers (plus our own) seal the block.
        for k in [0, 2, 3] {
            fx.msg_tx
                .send(ConsensusMessage::commit(&fx.keys[k], view, &hash))
                .await
                .unwrap();
        }

        let chain = fx.chain.clone();
        wait_until(move || chain.header().number >= 1).await;
        assert_eq!(fx.chain.header().hash(), hash);

        let extra = IbftExtra::decode(&fx.chain.header().extra).unwrap();
        assert!(extra.committed_seals.len() >= 3);

        fx.cancel.cancel();
        fx.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn two_commits_do_not_seal() {
        let fx = spawn_driver(4, 1, Duration::from_secs(5));
        let view = View::new(1, 0);

        let proposal = build_proposal(
            &fx.keys[0],
            fx.chain.as_ref(),
            &NoopExecutor::new(),
            &FifoPool::new(),
            &fx.set,
            &IbftConfig::default(),
        )
        .unwrap();
        let hash = proposal.hash();

        fx.msg_tx
            .send(ConsensusMessage::preprepare(
                &fx.keys[0],
                view,
                proposal.encode(),
            ))
            .await
            .unwrap();

        // Only one commit beyond our own: 2 < 3, the height must not seal.
        fx.msg_tx
            .send(ConsensusMessage::commit(&fx.keys[0], view, &hash))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fx.chain.header().number, 0);

        fx.cancel.cancel();
        fx.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missed_proposal_triggers_round_change() {
        // Short round timeout; no proposal ever arrives.
        let fx = spawn_driver(4, 1, Duration::from_millis(100));

        let transport = fx.transport.clone();
        wait_until(move || !transport.sent_of(MsgType::RoundChange).is_empty()).await;

        let rc = &fx.transport.sent_of(MsgType::RoundChange)[0];
        assert_eq!(rc.view.sequence, 1);
        assert_eq!(rc.view.round, 1);
        assert_eq!(fx.shared.view().round, 1);

        fx.cancel.cancel();
        fx.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn round_change_quorum_reenters_accept() {
        let fx = spawn_driver(4, 1, Duration::from_millis(100));

        // Wait for the driver to give up on round 0.
        let transport = fx.transport.clone();
        wait_until(move || !transport.sent_of(MsgType::RoundChange).is_empty()).await;

        // Three peers want round 5: with our own message that is 2f+1 once
        // we fast-forward there via the weak certificate.
        for k in [0, 2, 3] {
            fx.msg_tx
                .send(ConsensusMessage::round_change(
                    &fx.keys[k],
                    View::new(1, 5),
                ))
                .await
                .unwrap();
        }

        let shared = fx.shared.clone();
        wait_until(move || shared.view().round == 5).await;

        fx.cancel.cancel();
        fx.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_is_clean() {
        let fx = spawn_driver(4, 1, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.cancel.cancel();
        let result = fx.handle.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn shared_state_tag_is_readable_while_running() {
        let fx = spawn_driver(4, 1, Duration::from_secs(5));

        let shared = fx.shared.clone();
        wait_until(move || shared.view().sequence == 1).await;
        // The follower sits in Accept waiting for a proposal.
        assert_eq!(fx.shared.state(), IbftState::Accept);

        fx.cancel.cancel();
        fx.handle.await.unwrap().unwrap();
    }
}
