//! Sync protocol responses.

use crate::NetworkMessage;
use sbor::prelude::BasicSbor;

/// A peer's advertised chain tip.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct StatusResponse {
    /// Hex hash of the best-known block.
    pub hash: String,
    /// Height of the best-known block.
    pub number: u64,
    /// Big-endian total difficulty.
    pub difficulty: Vec<u8>,
}

impl StatusResponse {
    /// Decode the total difficulty, treating out-of-range values as saturated.
    pub fn total_difficulty(&self) -> u128 {
        let mut buf = [0u8; 16];
        let src = if self.difficulty.len() > 16 {
            return u128::MAX;
        } else {
            &self.difficulty
        };
        buf[16 - src.len()..].copy_from_slice(src);
        u128::from_be_bytes(buf)
    }

    /// Encode a total difficulty as trimmed big-endian bytes.
    pub fn difficulty_bytes(td: u128) -> Vec<u8> {
        let full = td.to_be_bytes();
        let first = full.iter().position(|b| *b != 0).unwrap_or(full.len() - 1);
        full[first..].to_vec()
    }
}

impl NetworkMessage for StatusResponse {
    fn message_type_id() -> &'static str {
        "sync.status"
    }
}

/// One opaque payload slot in a bulk response.
///
/// An empty `value` signals "not found" for lookups where misses are
/// tolerated (bodies). Headers, bodies and receipts all ride in this same
/// envelope; the request type disambiguates decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct RawObject {
    /// Canonical encoding of the carried entity, or empty for a miss.
    pub value: Vec<u8>,
}

impl RawObject {
    /// A filled slot.
    pub fn filled(value: Vec<u8>) -> Self {
        Self { value }
    }

    /// An empty "not found" slot.
    pub fn missing() -> Self {
        Self { value: Vec::new() }
    }

    /// True when this slot signals a miss.
    pub fn is_missing(&self) -> bool {
        self.value.is_empty()
    }
}

/// Uniform bulk envelope for headers, bodies and receipts.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ObjectsResponse {
    /// One slot per requested item, order preserved.
    pub objects: Vec<RawObject>,
}

impl NetworkMessage for ObjectsResponse {
    fn message_type_id() -> &'static str {
        "sync.objects"
    }
}

/// The single response type of the sync request/response protocol.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum SyncResponse {
    /// Answer to GetCurrent.
    Status(StatusResponse),
    /// Answer to GetHeaders / GetObjectsByHash.
    Objects(ObjectsResponse),
    /// Empty acknowledgement (Notify).
    Ack,
    /// The peer rejected the request (protocol violation, lookup failure).
    Error(String),
}

impl NetworkMessage for SyncResponse {
    fn message_type_id() -> &'static str {
        "sync.response"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_round_trip() {
        for td in [0u128, 1, 255, 256, u64::MAX as u128 + 5] {
            let status = StatusResponse {
                hash: String::new(),
                number: 0,
                difficulty: StatusResponse::difficulty_bytes(td),
            };
            assert_eq!(status.total_difficulty(), td);
        }
    }

    #[test]
    fn oversized_difficulty_saturates() {
        let status = StatusResponse {
            hash: String::new(),
            number: 0,
            difficulty: vec![0xff; 20],
        };
        assert_eq!(status.total_difficulty(), u128::MAX);
    }

    #[test]
    fn missing_slot_is_empty() {
        assert!(RawObject::missing().is_missing());
        assert!(!RawObject::filled(vec![1]).is_missing());
    }

    #[test]
    fn response_encode_round_trip() {
        let resp = SyncResponse::Objects(ObjectsResponse {
            objects: vec![RawObject::filled(vec![1, 2, 3]), RawObject::missing()],
        });
        let bytes = sbor::basic_encode(&resp).unwrap();
        let decoded: SyncResponse = sbor::basic_decode(&bytes).unwrap();
        assert_eq!(decoded, resp);
    }
}
