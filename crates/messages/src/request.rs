//! Sync protocol requests.

use crate::response::{ObjectsResponse, StatusResponse, SyncResponse};
use crate::{NetworkMessage, Request};
use sbor::prelude::BasicSbor;

/// Cap on the number of headers a single GetHeaders call returns.
pub const MAX_HEADERS_AMOUNT: i64 = 190;

/// Which object family a bulk-by-hash fetch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum ObjectKind {
    /// Block bodies. Misses are silent (empty payload): bodies may be pruned.
    Bodies,
    /// Receipt sequences. Misses abort the response: receipts are
    /// authoritative storage.
    Receipts,
}

/// Fetch headers starting at an origin, walking by `skip + 1`.
///
/// The origin is exactly one of `number` (≠ 0) or `hash` (non-empty hex
/// string); setting both is a protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct GetHeadersRequest {
    /// Origin height, or 0 when `hash` is used.
    pub number: i64,
    /// Origin header hash as hex, or empty when `number` is used.
    pub hash: String,
    /// Maximum headers to return; clamped to [`MAX_HEADERS_AMOUNT`].
    pub amount: i64,
    /// Stride minus one: consecutive returned headers differ by `skip + 1`.
    pub skip: i64,
}

impl GetHeadersRequest {
    /// A request anchored at a height.
    pub fn by_number(number: u64, amount: i64, skip: i64) -> Self {
        Self {
            number: number as i64,
            hash: String::new(),
            amount,
            skip,
        }
    }

    /// A request anchored at a header hash.
    pub fn by_hash(hash: impl Into<String>, amount: i64, skip: i64) -> Self {
        Self {
            number: 0,
            hash: hash.into(),
            amount,
            skip,
        }
    }
}

impl NetworkMessage for GetHeadersRequest {
    fn message_type_id() -> &'static str {
        "sync.get_headers"
    }
}

impl Request for GetHeadersRequest {
    type Response = ObjectsResponse;
}

/// Fetch bodies or receipts by header hash.
///
/// The response preserves order and length: one object slot per requested
/// hash, empty payload for a miss.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct GetObjectsRequest {
    /// Header hashes, hex-encoded.
    pub hashes: Vec<String>,
    /// Object family requested.
    pub kind: ObjectKind,
}

impl GetObjectsRequest {
    /// Build a request from typed hashes.
    pub fn new(hashes: impl IntoIterator<Item = istria_types::Hash>, kind: ObjectKind) -> Self {
        Self {
            hashes: hashes.into_iter().map(|h| h.to_hex()).collect(),
            kind,
        }
    }
}

impl NetworkMessage for GetObjectsRequest {
    fn message_type_id() -> &'static str {
        "sync.get_objects"
    }
}

impl Request for GetObjectsRequest {
    type Response = ObjectsResponse;
}

/// Push a newly sealed block to a peer.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct NotifyRequest {
    /// Canonical encoding of the block.
    pub raw: Vec<u8>,
}

impl NotifyRequest {
    /// Wrap an encoded block.
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }
}

impl NetworkMessage for NotifyRequest {
    fn message_type_id() -> &'static str {
        "sync.notify"
    }
}

/// Status query; carries no parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor)]
pub struct GetCurrentRequest;

impl NetworkMessage for GetCurrentRequest {
    fn message_type_id() -> &'static str {
        "sync.get_current"
    }
}

impl Request for GetCurrentRequest {
    type Response = StatusResponse;
}

/// The single request type of the sync request/response protocol.
///
/// The request variant disambiguates decoding of the uniform response
/// envelope on the client side.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum SyncRequest {
    /// Query the peer's current status.
    GetCurrent(GetCurrentRequest),
    /// Fetch a header range.
    GetHeaders(GetHeadersRequest),
    /// Fetch bodies or receipts by hash.
    GetObjects(GetObjectsRequest),
    /// Push a sealed block.
    Notify(NotifyRequest),
}

impl SyncRequest {
    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SyncRequest::GetCurrent(_) => "get_current",
            SyncRequest::GetHeaders(_) => "get_headers",
            SyncRequest::GetObjects(_) => "get_objects",
            SyncRequest::Notify(_) => "notify",
        }
    }
}

impl NetworkMessage for SyncRequest {
    fn message_type_id() -> &'static str {
        "sync.request"
    }
}

impl Request for SyncRequest {
    type Response = SyncResponse;
}
