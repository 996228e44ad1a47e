//! Istanbul BFT consensus.
//!
//! This crate drives a validator set through proposal, preparation,
//! commitment and round change, producing one canonically ordered block per
//! height while tolerating up to f = ⌊(n−1)/3⌋ Byzantine validators.
//!
//! # Architecture
//!
//! The [`Ibft`] driver runs in a dedicated task and owns the per-height
//! round state ([`CurrentState`]). It wakes on each authenticated message
//! from the transport or on the active state's timer:
//!
//! - **Accept**: compute the proposer; propose (if us) or await and
//!   validate the proposal
//! - **Validate**: broadcast Prepare; lock and broadcast Commit at 2f+1
//!   prepares; move on at 2f+1 commits
//! - **Commit**: assemble committed seals, write through the blockchain
//!   facade, advance the height
//! - **RoundChange**: converge on a new round (weak certificate
//!   fast-forward at f+1, commit at 2f+1, exponential timeout)
//! - **Sync**: delegate to the sync service until caught up
//!
//! All I/O beyond the message channel goes through narrow collaborator
//! traits: `Blockchain`, `Executor`, `TxPool` (from `istria-chain`),
//! [`ConsensusTransport`] and [`SyncFacade`] (defined here).
//!
//! # Terminology
//!
//! - **Height / sequence**: position in the chain; strictly sequential.
//! - **Round**: attempt number at a height; advances on timeout or failure.
//! - **View**: the (height, round) pair naming a protocol instance.
//! - **Locked**: commitment to one proposal at a height; only that proposal
//!   (or a higher round) may be accepted until the height is sealed.
//!
//! # Safety
//!
//! - Vote tallies are idempotent per sender, so message ordering and
//!   duplication cannot inflate a quorum.
//! - No block is written without 2f+1 distinct commit seals over its hash.
//! - Quorum intersection: any two 2f+1 quorums overlap in an honest
//!   validator, so conflicting blocks cannot both commit.

mod config;
mod driver;
mod proposal;
mod state;
mod traits;

pub use config::IbftConfig;
pub use driver::{DriverError, Ibft};
pub use proposal::{build_proposal, seal_committed, validate_proposal, ProposalError};
pub use state::{CurrentState, IbftState, SharedState};
pub use traits::{ConsensusTransport, SyncFacade};
