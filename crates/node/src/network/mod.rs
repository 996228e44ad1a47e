//! libp2p networking.

mod adapter;
mod codec;

pub use adapter::{
    derive_identity, InboundRequest, NetworkAdapter, NetworkConfig, NetworkError, PeerEvent,
};
pub use codec::{decode_gossip, encode_consensus, encode_notify, GossipMessage, WireError};

/// Gossipsub topic carrying signed consensus messages.
pub const TOPIC_CONSENSUS: &str = "istria/consensus/1.0.0";

/// Gossipsub topic carrying sealed-block announcements.
pub const TOPIC_BLOCKS: &str = "istria/blocks/1.0.0";

/// Request-response protocol name for the sync service.
pub const SYNC_PROTOCOL: &str = "/istria/sync/1.0.0";
