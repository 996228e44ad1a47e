//! Production wiring for an Istria node.
//!
//! Everything the protocol crates abstract over is made concrete here:
//!
//! - [`network`]: libp2p adapter — gossipsub topics for consensus messages
//!   and block announcements, request-response for the sync protocol
//! - [`storage`]: RocksDB block store implementing the blockchain facade
//! - [`rpc`]: axum status endpoints reading the consensus state tag through
//!   its atomic accessor
//! - [`runner`]: task wiring and shutdown
//!
//! The `istria` binary parses a TOML config and hands it to
//! [`runner::Node::start`].

pub mod config;
pub mod network;
pub mod rpc;
pub mod runner;
pub mod storage;
pub mod telemetry;

pub use config::NodeConfig;
pub use runner::Node;
