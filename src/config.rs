//! Node configuration
//!
//! Built once at startup (from the command line in the binary) and read-only
//! afterwards.

use crate::core::DEFAULT_DIFFICULTY;
use crate::crypto::is_valid_address;
use std::time::Duration;
use thiserror::Error;

/// Default cap on concurrently in-progress handshakes
pub const DEFAULT_MAX_CONNECT_PEER: usize = 8;

/// Default age after which an unfinished handshake is abandoned
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Highest accepted difficulty; the genesis block is mined at startup
pub const MAX_DIFFICULTY: u32 = 32;

/// Mempool size that triggers a mining round
pub const MINING_THRESHOLD: usize = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Node address must not be empty")]
    EmptyNodeAddress,
    #[error("Invalid peer address: {0:?}")]
    InvalidPeerAddress(String),
    #[error("max_connect_peer must be at least 1")]
    ZeroMaxConnectPeer,
    #[error("Handshake timeout must be non-zero")]
    ZeroHandshakeTimeout,
    #[error("Difficulty {0} exceeds the maximum of {}", MAX_DIFFICULTY)]
    DifficultyTooHigh(u32),
    #[error("Invalid mining address: {0}")]
    InvalidMiningAddress(String),
}

/// What this node does with an admitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// First known node: fans transactions out to everybody else
    Bootstrap,
    /// Has a payout address: mines once enough transactions are pending
    Miner,
    /// Only keeps the mempool
    Relay,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Our own listening address, as peers know us (`host:port`)
    pub node_address: String,
    /// Known peer addresses; the first entry is the bootstrap node
    pub known_nodes: Vec<String>,
    /// Payout address for coinbase rewards; enables mining
    pub mining_address: Option<String>,
    pub max_connect_peer: usize,
    pub handshake_timeout: Duration,
    pub difficulty: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_address: "127.0.0.1:3000".to_string(),
            known_nodes: vec!["127.0.0.1:3000".to_string()],
            mining_address: None,
            max_connect_peer: DEFAULT_MAX_CONNECT_PEER,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

impl NodeConfig {
    pub fn bootstrap_node(&self) -> Option<&str> {
        self.known_nodes.first().map(String::as_str)
    }

    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap_node() == Some(self.node_address.as_str())
    }

    /// Bootstrap wins over mining when both apply
    pub fn role(&self) -> Role {
        if self.is_bootstrap() {
            Role::Bootstrap
        } else if self.mining_address.is_some() {
            Role::Miner
        } else {
            Role::Relay
        }
    }

    /// Known nodes other than ourselves
    pub fn other_nodes(&self) -> impl Iterator<Item = &str> {
        self.known_nodes
            .iter()
            .map(String::as_str)
            .filter(move |addr| *addr != self.node_address)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_address.trim().is_empty() {
            return Err(ConfigError::EmptyNodeAddress);
        }
        if let Some(bad) = self
            .known_nodes
            .iter()
            .find(|addr| addr.trim().is_empty() || !addr.contains(':'))
        {
            return Err(ConfigError::InvalidPeerAddress(bad.clone()));
        }
        if self.max_connect_peer == 0 {
            return Err(ConfigError::ZeroMaxConnectPeer);
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(self.difficulty));
        }
        if let Some(address) = &self.mining_address {
            if !is_valid_address(address) {
                return Err(ConfigError::InvalidMiningAddress(address.clone()));
            }
        }
        Ok(())
    }
}
