//! Wire format for gossip payloads.
//!
//! ```text
//! [version: u8][payload: SBOR-encoded message]
//! ```
//!
//! The message type is determined by the gossipsub topic, not by a field in
//! the payload: the consensus topic carries [`ConsensusMessage`], the block
//! topic carries [`NotifyRequest`].

use super::{TOPIC_BLOCKS, TOPIC_CONSENSUS};
use istria_messages::{ConsensusMessage, NotifyRequest};
use thiserror::Error;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Errors decoding a gossip payload.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("message too short")]
    MessageTooShort,

    #[error("sbor decode error: {0}")]
    Decode(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}

/// A decoded gossip payload.
#[derive(Debug, Clone)]
pub enum GossipMessage {
    /// A signed consensus envelope.
    Consensus(ConsensusMessage),
    /// A sealed-block announcement.
    Block(NotifyRequest),
}

/// Encode a consensus message for the consensus topic.
pub fn encode_consensus(msg: &ConsensusMessage) -> Vec<u8> {
    frame(msg.encode())
}

/// Encode a block announcement for the blocks topic.
pub fn encode_notify(req: &NotifyRequest) -> Vec<u8> {
    frame(sbor::basic_encode(req).expect("notify encoding is infallible"))
}

fn frame(payload: Vec<u8>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.extend(payload);
    bytes
}

/// Decode a gossip payload, dispatching on topic.
pub fn decode_gossip(topic: &str, data: &[u8]) -> Result<GossipMessage, WireError> {
    if data.is_empty() {
        return Err(WireError::MessageTooShort);
    }
    let version = data[0];
    if version != WIRE_VERSION {
        return Err(WireError::UnknownVersion(version));
    }
    let payload = &data[1..];

    match topic {
        TOPIC_CONSENSUS => {
            let msg = ConsensusMessage::decode(payload)
                .map_err(|e| WireError::Decode(format!("{e:?}")))?;
            Ok(GossipMessage::Consensus(msg))
        }
        TOPIC_BLOCKS => {
            let req: NotifyRequest =
                sbor::basic_decode(payload).map_err(|e| WireError::Decode(format!("{e:?}")))?;
            Ok(GossipMessage::Block(req))
        }
        other => Err(WireError::UnknownTopic(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istria_types::test_utils::test_keypair;
    use istria_types::View;

    #[test]
    fn consensus_round_trip() {
        let key = test_keypair(1);
        let msg = ConsensusMessage::prepare(&key, View::new(4, 1));
        let bytes = encode_consensus(&msg);
        assert_eq!(bytes[0], WIRE_VERSION);

        match decode_gossip(TOPIC_CONSENSUS, &bytes).unwrap() {
            GossipMessage::Consensus(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn notify_round_trip() {
        let req = NotifyRequest::new(vec![1, 2, 3]);
        let bytes = encode_notify(&req);

        match decode_gossip(TOPIC_BLOCKS, &bytes).unwrap() {
            GossipMessage::Block(decoded) => assert_eq!(decoded, req),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let bytes = vec![99, 1, 2, 3];
        assert!(matches!(
            decode_gossip(TOPIC_CONSENSUS, &bytes),
            Err(WireError::UnknownVersion(99))
        ));
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let key = test_keypair(1);
        let bytes = encode_consensus(&ConsensusMessage::prepare(&key, View::new(1, 0)));
        assert!(matches!(
            decode_gossip("istria/other/1.0.0", &bytes),
            Err(WireError::UnknownTopic(_))
        ));
    }
}
