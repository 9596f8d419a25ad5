//! Peer registry
//!
//! Tracks, per remote address, either an unfinished handshake
//! ([`PeerConnection`]) or the last time a connected peer was seen. Both maps
//! sit behind one lock so every handshake transition is a single critical
//! section.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Transport-level peer errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Where an unfinished handshake stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// We sent `version` and wait for the peer's
    AwaitingVersion,
    /// Versions are exchanged, waiting for `verack`
    AwaitingVerAck,
}

/// One in-progress handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub remote_address: String,
    pub state: HandshakeState,
    pub last_contact: DateTime<Utc>,
    /// Known once the peer's `version` has arrived
    pub peer_best_height: Option<u64>,
}

impl PeerConnection {
    fn new(remote_address: &str, state: HandshakeState, peer_best_height: Option<u64>) -> Self {
        Self {
            remote_address: remote_address.to_string(),
            state,
            last_contact: Utc::now(),
            peer_best_height,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("{0} handshakes already in progress")]
    AtCapacity(usize),
    #[error("handshake with {0} already in progress")]
    AlreadyConnecting(String),
    #[error("{0} is already an active peer")]
    AlreadyActive(String),
    #[error("version from {addr} while {state:?}")]
    UnexpectedVersion { addr: String, state: HandshakeState },
    #[error("verack from {addr} without a pending version exchange")]
    UnexpectedVerAck { addr: String },
}

/// What the node must send after a `version` was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionReply {
    /// Peer initiated: answer with our own `version`, then `verack`
    VersionAndVerAck,
    /// We initiated and this is the answer: send `verack`
    VerAck,
}

#[derive(Debug, Default)]
struct Peers {
    connecting: HashMap<String, PeerConnection>,
    /// Address -> last seen
    active: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<Peers>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that we are about to send `version` to `addr`
    pub async fn begin_outbound(&self, addr: &str, max_connecting: usize) -> Result<(), HandshakeError> {
        let mut peers = self.peers.write().await;

        if peers.connecting.contains_key(addr) {
            return Err(HandshakeError::AlreadyConnecting(addr.to_string()));
        }
        if peers.active.contains_key(addr) {
            return Err(HandshakeError::AlreadyActive(addr.to_string()));
        }
        if peers.connecting.len() >= max_connecting {
            return Err(HandshakeError::AtCapacity(peers.connecting.len()));
        }

        peers.connecting.insert(
            addr.to_string(),
            PeerConnection::new(addr, HandshakeState::AwaitingVersion, None),
        );
        Ok(())
    }

    /// Apply an incoming `version` carrying `best_height`
    pub async fn accept_version(
        &self,
        addr: &str,
        best_height: u64,
        max_connecting: usize,
    ) -> Result<VersionReply, HandshakeError> {
        let mut peers = self.peers.write().await;

        match peers.connecting.get_mut(addr) {
            Some(conn) if conn.state == HandshakeState::AwaitingVersion => {
                conn.state = HandshakeState::AwaitingVerAck;
                conn.peer_best_height = Some(best_height);
                conn.last_contact = Utc::now();
                Ok(VersionReply::VerAck)
            }
            Some(conn) => Err(HandshakeError::UnexpectedVersion {
                addr: addr.to_string(),
                state: conn.state,
            }),
            None => {
                if peers.connecting.len() >= max_connecting {
                    return Err(HandshakeError::AtCapacity(peers.connecting.len()));
                }
                peers.connecting.insert(
                    addr.to_string(),
                    PeerConnection::new(addr, HandshakeState::AwaitingVerAck, Some(best_height)),
                );
                Ok(VersionReply::VersionAndVerAck)
            }
        }
    }

    /// Complete the handshake with `addr`; returns the height it reported
    pub async fn accept_verack(&self, addr: &str) -> Result<u64, HandshakeError> {
        let mut peers = self.peers.write().await;

        let pending = matches!(
            peers.connecting.get(addr),
            Some(conn) if conn.state == HandshakeState::AwaitingVerAck
        );
        if !pending {
            return Err(HandshakeError::UnexpectedVerAck {
                addr: addr.to_string(),
            });
        }

        let conn = peers
            .connecting
            .remove(addr)
            .ok_or_else(|| HandshakeError::UnexpectedVerAck {
                addr: addr.to_string(),
            })?;
        peers.active.insert(addr.to_string(), Utc::now());

        Ok(conn.peer_best_height.unwrap_or(0))
    }

    /// Refresh the last-seen time of an active peer
    pub async fn touch(&self, addr: &str) -> bool {
        let mut peers = self.peers.write().await;
        match peers.active.get_mut(addr) {
            Some(seen) => {
                *seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Drop handshakes whose last transition is at least `max_age` old
    pub async fn abandon_stale(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut peers = self.peers.write().await;

        let stale: Vec<String> = peers
            .connecting
            .values()
            .filter(|conn| {
                (now - conn.last_contact)
                    .to_std()
                    .map(|age| age >= max_age)
                    .unwrap_or(false)
            })
            .map(|conn| conn.remote_address.clone())
            .collect();

        for addr in &stale {
            peers.connecting.remove(addr);
        }
        stale
    }

    pub async fn connection(&self, addr: &str) -> Option<PeerConnection> {
        self.peers.read().await.connecting.get(addr).cloned()
    }

    pub async fn is_active(&self, addr: &str) -> bool {
        self.peers.read().await.active.contains_key(addr)
    }

    pub async fn last_seen(&self, addr: &str) -> Option<DateTime<Utc>> {
        self.peers.read().await.active.get(addr).copied()
    }

    pub async fn active_peers(&self) -> Vec<String> {
        let peers = self.peers.read().await;
        let mut addrs: Vec<String> = peers.active.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub async fn connecting_count(&self) -> usize {
        self.peers.read().await.connecting.len()
    }
}
