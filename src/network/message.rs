//! Protocol messages
//!
//! Every message travels inside an [`Envelope`] carrying the sender's
//! listening address, which is how handlers identify the remote peer.

use crate::core::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version announced in `version` messages
pub const PROTOCOL_VERSION: u32 = 1;

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x52, 0x4C, 0x41, 0x59]; // "RLAY"

/// Largest accepted envelope body
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// What an inventory entry or data request refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvKind {
    Block,
    Tx,
}

impl fmt::Display for InvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvKind::Block => write!(f, "block"),
            InvKind::Tx => write!(f, "tx"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: u32,
    pub best_height: u64,
}

impl VersionMessage {
    pub fn new(best_height: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            best_height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// "Hello, my best height is ..."
    Version(VersionMessage),
    /// Accepts the connection
    VerAck,
    /// Asks for the sender's block hash list
    GetBlocks,
    /// Announces blocks or transactions by id
    Inv { kind: InvKind, items: Vec<String> },
    /// Requests the full block or transaction for an id
    GetData { kind: InvKind, id: String },
    /// Serialized block
    Block(Vec<u8>),
    Tx(Transaction),
    Ping,
    Pong,
    /// Address gossip, accepted but unused
    Addr(Vec<String>),
}

impl Message {
    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::VerAck => "verack",
            Message::GetBlocks => "getblocks",
            Message::Inv { .. } => "inv",
            Message::GetData { .. } => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::Addr(_) => "addr",
        }
    }
}

/// A message plus the listening address of its sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub message: Message,
}

impl Envelope {
    pub fn new(from: impl Into<String>, message: Message) -> Self {
        Self {
            from: from.into(),
            message,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let env = Envelope::new(
            "127.0.0.1:3001",
            Message::Inv {
                kind: InvKind::Block,
                items: vec!["aa".to_string(), "bb".to_string()],
            },
        );
        let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_inv_kind_wire_names() {
        assert_eq!(serde_json::to_string(&InvKind::Block).unwrap(), "\"block\"");
        assert_eq!(serde_json::to_string(&InvKind::Tx).unwrap(), "\"tx\"");
        assert_eq!(InvKind::Tx.to_string(), "tx");
    }

    #[test]
    fn test_version_message() {
        let version = VersionMessage::new(42);
        assert_eq!(version.version, PROTOCOL_VERSION);
        assert_eq!(Message::Version(version).type_name(), "version");
    }
}
