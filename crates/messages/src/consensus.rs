//! The signed consensus message envelope.

use istria_types::{keccak256, CryptoError, Hash, KeyPair, Signature, View};
use sbor::prelude::BasicSbor;
use thiserror::Error;

/// Domain suffix appended to a proposal hash before signing a commit seal.
/// Distinguishes the seal from a plain proposal signature so a Preprepare
/// signature can never be replayed as a committed seal.
const COMMIT_SEAL_SUFFIX: u8 = 2;

/// Errors raised when authenticating a consensus message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("signature recovery failed: {0}")]
    Recovery(#[from] CryptoError),

    #[error("message carries no payload")]
    EmptyPayload,
}

/// The four consensus message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum MsgType {
    /// Proposer's block proposal for the current view.
    Preprepare,
    /// Vote that the proposal is acceptable.
    Prepare,
    /// Vote to commit; carries the commit seal.
    Commit,
    /// Vote to abandon the current round.
    RoundChange,
}

impl MsgType {
    /// Stable wire code, part of the signing preimage.
    fn code(&self) -> u8 {
        match self {
            MsgType::Preprepare => 0,
            MsgType::Prepare => 1,
            MsgType::Commit => 2,
            MsgType::RoundChange => 3,
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MsgType::Preprepare => "preprepare",
            MsgType::Prepare => "prepare",
            MsgType::Commit => "commit",
            MsgType::RoundChange => "round-change",
        };
        f.write_str(s)
    }
}

/// A signed consensus message.
///
/// The sender is never carried explicitly: it is recovered from the
/// signature over the Keccak digest of (view, type, payload), so a message
/// cannot claim an origin its key does not prove.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ConsensusMessage {
    /// Protocol instance this message belongs to.
    pub view: View,
    /// Message type.
    pub msg_type: MsgType,
    /// Encoded proposal for Preprepare, commit seal for Commit, empty
    /// otherwise.
    pub payload: Vec<u8>,
    /// Recoverable signature over the digest of the fields above.
    pub signature: Signature,
}

impl ConsensusMessage {
    /// Build and sign a message.
    pub fn signed(key: &KeyPair, view: View, msg_type: MsgType, payload: Vec<u8>) -> Self {
        let digest = signing_digest(&view, &msg_type, &payload);
        let signature = key.sign_digest(&digest);
        Self {
            view,
            msg_type,
            payload,
            signature,
        }
    }

    /// A Preprepare carrying the encoded proposal.
    pub fn preprepare(key: &KeyPair, view: View, proposal: Vec<u8>) -> Self {
        Self::signed(key, view, MsgType::Preprepare, proposal)
    }

    /// A Prepare for the current view.
    pub fn prepare(key: &KeyPair, view: View) -> Self {
        Self::signed(key, view, MsgType::Prepare, Vec::new())
    }

    /// A Commit carrying the commit seal over `proposal_hash`.
    pub fn commit(key: &KeyPair, view: View, proposal_hash: &Hash) -> Self {
        let seal = key.sign_digest(&commit_seal_digest(proposal_hash));
        Self::signed(key, view, MsgType::Commit, seal.as_bytes().to_vec())
    }

    /// A RoundChange targeting `view.round`.
    pub fn round_change(key: &KeyPair, view: View) -> Self {
        Self::signed(key, view, MsgType::RoundChange, Vec::new())
    }

    /// Recover the sender address from the signature.
    pub fn from_addr(&self) -> Result<istria_types::Address, MessageError> {
        let digest = signing_digest(&self.view, &self.msg_type, &self.payload);
        Ok(self.signature.recover(&digest)?)
    }

    /// The commit seal carried by a Commit message.
    pub fn commit_seal(&self) -> Result<Signature, MessageError> {
        let bytes: [u8; 65] = self
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| MessageError::EmptyPayload)?;
        Ok(Signature::from_bytes(bytes))
    }

    /// Canonical encoding for the wire.
    pub fn encode(&self) -> Vec<u8> {
        sbor::basic_encode(self).expect("message encoding is infallible")
    }

    /// Decode from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, sbor::DecodeError> {
        sbor::basic_decode(bytes)
    }
}

impl crate::NetworkMessage for ConsensusMessage {
    fn message_type_id() -> &'static str {
        "consensus.message"
    }
}

/// Digest a commit seal is produced over: the proposal hash with the commit
/// domain suffix appended.
pub fn commit_seal_digest(proposal_hash: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(33);
    buf.extend_from_slice(proposal_hash.as_bytes());
    buf.push(COMMIT_SEAL_SUFFIX);
    keccak256(&buf)
}

/// Signing preimage: domain tag, view, type code, payload.
fn signing_digest(view: &View, msg_type: &MsgType, payload: &[u8]) -> Hash {
    let mut buf = Vec::with_capacity(32 + payload.len());
    buf.extend_from_slice(b"ibft_msg:");
    buf.extend_from_slice(&view.sequence.to_le_bytes());
    buf.extend_from_slice(&view.round.to_le_bytes());
    buf.push(msg_type.code());
    buf.extend_from_slice(payload);
    keccak256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use istria_types::test_utils::test_keypair;

    #[test]
    fn sender_recovery() {
        let key = test_keypair(1);
        let msg = ConsensusMessage::prepare(&key, View::new(3, 1));
        assert_eq!(msg.from_addr().unwrap(), key.address());
    }

    #[test]
    fn tampered_view_changes_sender() {
        let key = test_keypair(1);
        let mut msg = ConsensusMessage::prepare(&key, View::new(3, 1));
        msg.view.round = 2;
        // Signature no longer matches, so recovery yields some other address
        // (or fails outright); either way the claimed sender is not proven.
        match msg.from_addr() {
            Ok(addr) => assert_ne!(addr, key.address()),
            Err(_) => {}
        }
    }

    #[test]
    fn commit_carries_recoverable_seal() {
        let key = test_keypair(2);
        let proposal_hash = istria_types::Hash::from_bytes([9; 32]);
        let msg = ConsensusMessage::commit(&key, View::new(5, 0), &proposal_hash);

        let seal = msg.commit_seal().unwrap();
        let sealer = seal.recover(&commit_seal_digest(&proposal_hash)).unwrap();
        assert_eq!(sealer, key.address());
    }

    #[test]
    fn commit_seal_domain_is_separated() {
        let hash = istria_types::Hash::from_bytes([9; 32]);
        assert_ne!(commit_seal_digest(&hash), hash);
    }

    #[test]
    fn prepare_has_no_payload() {
        let key = test_keypair(3);
        let msg = ConsensusMessage::prepare(&key, View::new(1, 0));
        assert!(msg.payload.is_empty());
        assert!(matches!(
            msg.commit_seal(),
            Err(MessageError::EmptyPayload)
        ));
    }

    #[test]
    fn encode_round_trip() {
        let key = test_keypair(4);
        let msg = ConsensusMessage::round_change(&key, View::new(8, 4));
        let decoded = ConsensusMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.from_addr().unwrap(), key.address());
    }
}
