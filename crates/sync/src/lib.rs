//! Block synchronization for Istria.
//!
//! Two halves share this crate:
//!
//! - [`SyncService`]: the server side — answers `GetCurrent`, `GetHeaders`
//!   and `GetObjectsByHash`, and accepts `Notify` block pushes into a
//!   bounded per-peer queue.
//! - [`Syncer`]: the driver — tracks per-peer status, picks the best peer,
//!   downloads and validates the missing range, and applies pushed blocks.
//!
//! The transport is abstracted behind [`SyncClient`]; the production node
//! routes it over libp2p request-response, tests wire two services
//! back-to-back in process.

mod client;
mod config;
mod peers;
mod queue;
mod service;
mod syncer;

pub use client::{get_bodies, get_headers, get_status, ClientError, SyncClient};
pub use config::SyncConfig;
pub use peers::{PeerBook, PeerId, PeerStatus};
pub use queue::NotifyQueue;
pub use service::{ProtocolError, SyncService};
pub use syncer::{Syncer, SyncerHandle};
