//! Chain-relay: the peer-to-peer message core of a minimal blockchain node
//!
//! This crate provides:
//! - A version/verack handshake with a bounded set of in-progress peers
//! - Block catch-up over getblocks / inv / getdata / block
//! - A transaction mempool with bootstrap fan-out and a mining trigger
//! - Reference collaborators: in-memory UTXO chain, signature verifier,
//!   proof-of-work miner and a TCP transport
//!
//! # Example
//!
//! ```rust
//! use chain_relay::config::NodeConfig;
//! use chain_relay::core::{Blockchain, SharedChain, UtxoVerifier};
//! use chain_relay::mining::Miner;
//! use chain_relay::network::{MemoryTransport, Node};
//! use std::sync::Arc;
//!
//! let config = NodeConfig {
//!     difficulty: 8,
//!     ..Default::default()
//! };
//! let chain = SharedChain::new(Blockchain::with_difficulty(config.difficulty));
//! let transport = MemoryTransport::new(config.node_address.clone());
//!
//! let node = Node::new(
//!     config,
//!     Arc::new(chain),
//!     Arc::new(UtxoVerifier),
//!     Arc::new(Miner::new()),
//!     Arc::new(transport),
//! );
//! assert_eq!(node.address(), "127.0.0.1:3000");
//! ```

pub mod config;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;

// Re-export commonly used types
pub use config::{NodeConfig, Role};
pub use core::{Block, Blockchain, ChainStore, SharedChain, Transaction, UtxoVerifier};
pub use crypto::KeyPair;
pub use mining::{Mempool, Miner};
pub use network::{HandleResult, Message, Node, Outcome, Rejection};
