//! UDP wire format: the JSON datagrams exchanged between nodes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::peer::PeerKey;

/// Datagrams must stay under this to avoid IP fragmentation.
pub const MAX_DATAGRAM_BYTES: usize = 1400;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed datagram: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message exceeds {MAX_DATAGRAM_BYTES} bytes")]
    TooLarge,
}

pub type Result<T> = std::result::Result<T, WireError>;

/// One gossip message: a heartbeat or a re-broadcast peer announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipMessage {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub path: Vec<PeerKey>,
}

/// The two roles a consensus datagram can play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConsensusMessage {
    Forward {
        id: String,
        parentid: String,
        om: i64,
        index: u8,
        value: String,
        origin: PeerKey,
        #[serde(default)]
        path: Vec<PeerKey>,
    },
    Report {
        id: String,
        parentid: String,
        reporter: PeerKey,
        value: String,
    },
}

impl ConsensusMessage {
    pub fn id(&self) -> &str {
        match self {
            ConsensusMessage::Forward { id, .. } => id,
            ConsensusMessage::Report { id, .. } => id,
        }
    }

    pub fn parentid(&self) -> &str {
        match self {
            ConsensusMessage::Forward { parentid, .. } => parentid,
            ConsensusMessage::Report { parentid, .. } => parentid,
        }
    }
}

/// Top-level envelope carried over UDP. Tagged on `"type"` so unrelated
/// fields of one variant never collide with the other's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    Gossip(GossipMessage),
    Consensus(ConsensusMessage),
}

impl WireMessage {
    /// Parses a single datagram. Malformed or incomplete JSON is reported as
    /// an error; callers are expected to log-and-drop rather than propagate.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_DATAGRAM_BYTES {
            return Err(WireError::TooLarge);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gossip_round_trips() {
        let msg = WireMessage::Gossip(GossipMessage {
            id: "abc".into(),
            host: "127.0.0.1".into(),
            port: 9000,
            path: vec!["127.0.0.1:9001".into()],
        });
        let encoded = msg.encode().unwrap();
        let decoded = WireMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn consensus_forward_round_trips() {
        let msg = WireMessage::Consensus(ConsensusMessage::Forward {
            id: "r1".into(),
            parentid: String::new(),
            om: 2,
            index: 3,
            value: "tree".into(),
            origin: "127.0.0.1:9000".into(),
            path: vec!["127.0.0.1:9000".into()],
        });
        let encoded = msg.encode().unwrap();
        let decoded = WireMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn unknown_fields_are_ignored_not_rejected() {
        let raw = br#"{"type":"gossip","id":"x","host":"h","port":1,"path":[],"extra":true}"#;
        let decoded = WireMessage::decode(raw).unwrap();
        assert!(matches!(decoded, WireMessage::Gossip(_)));
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let raw = br#"{"type":"consensus","kind":"forward"}"#;
        assert!(WireMessage::decode(raw).is_err());
    }

    #[test]
    fn garbage_bytes_are_an_error_not_a_panic() {
        let raw = b"not json at all {{{";
        assert!(WireMessage::decode(raw).is_err());
    }
}
