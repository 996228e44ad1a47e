//! Network messages for the Istria protocols.
//!
//! Two message families share this crate:
//!
//! - **Consensus** ([`ConsensusMessage`]): the signed envelope gossiped
//!   between validators (Preprepare / Prepare / Commit / RoundChange).
//! - **Sync** ([`SyncRequest`] / [`SyncResponse`]): the request/response
//!   pairs of the block synchronization protocol.
//!
//! Every type here derives `BasicSbor`; the node's wire codec prepends a
//! version byte and dispatches by gossip topic or request discriminant.

pub mod consensus;
pub mod request;
pub mod response;

pub use consensus::{commit_seal_digest, ConsensusMessage, MessageError, MsgType};
pub use request::{
    GetCurrentRequest, GetHeadersRequest, GetObjectsRequest, NotifyRequest, ObjectKind,
    SyncRequest, MAX_HEADERS_AMOUNT,
};
pub use response::{ObjectsResponse, RawObject, StatusResponse, SyncResponse};

/// Marker for types that travel on the wire, keyed by a stable type id used
/// for topic naming and logging.
pub trait NetworkMessage {
    /// Stable identifier, e.g. `"consensus.message"`.
    fn message_type_id() -> &'static str;
}

/// Type-safe request/response pairing for the sync protocol.
pub trait Request: NetworkMessage {
    /// The response this request expects.
    type Response: NetworkMessage;
}
