//! P2P networking
//!
//! The message core of the node:
//! - version/verack handshake with a bounded number of in-progress peers
//! - block catch-up through getblocks / inv / getdata / block
//! - transaction relay and the mining trigger
//! - TCP transport with magic + length framed JSON envelopes

pub mod fetch;
mod handshake;
pub mod message;
pub mod node;
pub mod peer;
mod relay;
pub mod server;
mod sync;
pub mod transport;

pub use fetch::BlockFetchQueue;
pub use message::{
    Envelope, InvKind, Message, VersionMessage, MAGIC, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use node::{HandleResult, Node, NodeStatus, Outcome, Rejection, SyncState};
pub use peer::{
    HandshakeError, HandshakeState, PeerConnection, PeerError, PeerRegistry, VersionReply,
};
pub use server::{connect_to_peer, handle_connection, EnvelopeCodec, Server};
pub use transport::{MemoryTransport, Outbox, TcpTransport, Transport};
