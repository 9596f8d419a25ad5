//! P2P Node implementation
//!
//! [`Node`] owns all shared protocol state and dispatches each inbound message
//! to exactly one handler. The handlers live next to the state they drive:
//! `handshake.rs`, `sync.rs` and `relay.rs`.

use crate::config::{NodeConfig, Role};
use crate::core::{ChainStore, TxVerifier};
use crate::mining::{BlockProducer, Mempool};
use crate::network::fetch::BlockFetchQueue;
use crate::network::message::{InvKind, Message};
use crate::network::peer::{HandshakeError, PeerRegistry};
use crate::network::server::{handle_connection, Server};
use crate::network::transport::Transport;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// What a handler did with a message it accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Our `version` went out to open a handshake
    HandshakeStarted,
    /// A response went back to the sender
    Replied,
    /// Handshake complete; `syncing` when we asked the peer for its blocks
    PeerActivated { syncing: bool },
    /// A `getdata` went out
    Requested { kind: InvKind, id: String },
    /// A delivered block was processed. `next` is the id requested after it;
    /// with nothing left to fetch the UTXO index was rebuilt instead.
    BlockProcessed {
        hash: String,
        appended: bool,
        next: Option<String>,
        reindexed: bool,
    },
    /// Transaction entered the mempool and was announced to `relayed_to`
    TxAdmitted { relayed_to: Vec<String> },
    /// Hashes of the blocks mined in response, in order
    Mined { blocks: Vec<String> },
    /// Mining was due but no pending transaction could be mined
    MiningSkipped,
    /// Nothing to do
    Ignored,
}

/// Why a message was dropped. Logged locally, never sent to the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("at capacity: {0} handshakes in progress")]
    AtCapacity(usize),
    #[error("{kind} {id} not found")]
    NotFound { kind: InvKind, id: String },
    #[error("duplicate {kind} {id}")]
    Duplicate { kind: InvKind, id: String },
    #[error("invalid: {0}")]
    Invalid(String),
}

impl From<HandshakeError> for Rejection {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::AtCapacity(n) => Rejection::AtCapacity(n),
            other => Rejection::ProtocolViolation(other.to_string()),
        }
    }
}

pub type HandleResult = Result<Outcome, Rejection>;

/// Progress of block catch-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// Blocks still queued behind the one currently requested
    Fetching { remaining: usize },
}

/// Node status information
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub address: String,
    pub role: Role,
    pub height: u64,
    pub active_peers: Vec<String>,
    pub connecting_peers: usize,
    pub pending_tx: usize,
    pub sync: SyncState,
}

/// The main P2P node
pub struct Node {
    pub(crate) config: NodeConfig,
    pub(crate) chain: Arc<dyn ChainStore>,
    pub(crate) verifier: Arc<dyn TxVerifier>,
    pub(crate) producer: Arc<dyn BlockProducer>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) peers: PeerRegistry,
    pub(crate) mempool: RwLock<Mempool>,
    pub(crate) fetch_queue: BlockFetchQueue,
    /// Held for the whole of a mining loop
    pub(crate) mining: Mutex<()>,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        chain: Arc<dyn ChainStore>,
        verifier: Arc<dyn TxVerifier>,
        producer: Arc<dyn BlockProducer>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            chain,
            verifier,
            producer,
            transport,
            peers: PeerRegistry::new(),
            mempool: RwLock::new(Mempool::new()),
            fetch_queue: BlockFetchQueue::new(),
            mining: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn address(&self) -> &str {
        &self.config.node_address
    }

    pub fn chain(&self) -> &Arc<dyn ChainStore> {
        &self.chain
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn mempool(&self) -> &RwLock<Mempool> {
        &self.mempool
    }

    pub fn fetch_queue(&self) -> &BlockFetchQueue {
        &self.fetch_queue
    }

    pub(crate) async fn send(&self, to: &str, message: Message) {
        log::debug!("Sending {} to {}", message.type_name(), to);
        self.transport.send(to, message).await;
    }

    /// Handle one inbound message from the peer listening at `from`
    pub async fn handle(&self, from: &str, message: Message) -> HandleResult {
        let kind = message.type_name();
        log::debug!("Received {} from {}", kind, from);

        let result = match message {
            Message::Version(version) => self.on_version(from, version).await,
            Message::VerAck => self.on_verack(from).await,
            Message::GetBlocks => self.on_get_blocks(from).await,
            Message::Inv { kind, items } => self.on_inv(from, kind, items).await,
            Message::GetData { kind, id } => self.on_get_data(from, kind, id).await,
            Message::Block(bytes) => self.on_block(from, bytes).await,
            Message::Tx(tx) => self.on_tx(from, tx).await,
            Message::Ping => self.on_ping(from).await,
            Message::Pong => self.on_pong(from).await,
            Message::Addr(addrs) => {
                log::debug!("Received {} addresses from {}", addrs.len(), from);
                Ok(Outcome::Ignored)
            }
        };

        match &result {
            Err(rejection @ Rejection::Invalid(_)) => {
                log::warn!("Dropped {} from {}: {}", kind, from, rejection)
            }
            Err(rejection) => log::debug!("Dropped {} from {}: {}", kind, from, rejection),
            Ok(_) => {}
        }
        result
    }

    pub async fn sync_state(&self) -> SyncState {
        match self.fetch_queue.len().await {
            0 => SyncState::Idle,
            remaining => SyncState::Fetching { remaining },
        }
    }

    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            address: self.config.node_address.clone(),
            role: self.config.role(),
            height: self.chain.best_height().await,
            active_peers: self.peers.active_peers().await,
            connecting_peers: self.peers.connecting_count().await,
            pending_tx: self.mempool.read().await.len(),
            sync: self.sync_state().await,
        }
    }

    /// Serve `server` forever: handshake with the bootstrap node, abandon
    /// stale handshakes periodically and spawn a reader per inbound
    /// connection.
    pub async fn run(self: Arc<Self>, server: Server) {
        if !self.config.is_bootstrap() {
            if let Some(bootstrap) = self.config.bootstrap_node() {
                log::info!("Connecting to bootstrap node {}", bootstrap);
                if let Err(e) = self.initiate_handshake(bootstrap).await {
                    log::warn!("Handshake with {} not started: {}", bootstrap, e);
                }
            }
        }

        let janitor = self.clone();
        tokio::spawn(async move {
            let timeout = janitor.config.handshake_timeout;
            let mut ticker = tokio::time::interval(timeout);
            loop {
                ticker.tick().await;
                for addr in janitor.peers.abandon_stale(timeout).await {
                    log::info!("Abandoned stale handshake with {}", addr);
                }
            }
        });

        loop {
            match server.accept().await {
                Ok((stream, addr)) => {
                    log::debug!("Incoming connection from {}", addr);
                    let node = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, node).await {
                            log::warn!("Connection error with {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{Blockchain, SharedChain, UtxoVerifier};
    use crate::mining::Miner;
    use crate::network::message::Envelope;
    use crate::network::transport::MemoryTransport;

    pub(crate) fn test_node(
        config: NodeConfig,
        chain: Blockchain,
    ) -> (Node, SharedChain, MemoryTransport) {
        let shared = SharedChain::new(chain);
        let transport = MemoryTransport::new(config.node_address.clone());
        let node = Node::new(
            config,
            Arc::new(shared.clone()),
            Arc::new(UtxoVerifier),
            Arc::new(Miner::new()),
            Arc::new(transport.clone()),
        );
        (node, shared, transport)
    }

    pub(crate) fn relay_config(address: &str) -> NodeConfig {
        NodeConfig {
            node_address: address.to_string(),
            known_nodes: vec!["10.0.0.1:3000".to_string(), address.to_string()],
            difficulty: 4,
            ..Default::default()
        }
    }

    pub(crate) fn sent_messages(sent: &[(String, Envelope)]) -> Vec<(&str, &Message)> {
        sent.iter()
            .map(|(to, env)| (to.as_str(), &env.message))
            .collect()
    }

    #[tokio::test]
    async fn test_status_of_fresh_node() {
        let (node, _, _) = test_node(relay_config("10.0.0.9:3000"), Blockchain::with_difficulty(4));
        let status = node.status().await;

        assert_eq!(status.address, "10.0.0.9:3000");
        assert_eq!(status.role, Role::Relay);
        assert_eq!(status.height, 0);
        assert!(status.active_peers.is_empty());
        assert_eq!(status.connecting_peers, 0);
        assert_eq!(status.pending_tx, 0);
        assert_eq!(status.sync, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_addr_is_accepted_without_action() {
        let (node, _, transport) =
            test_node(relay_config("10.0.0.9:3000"), Blockchain::with_difficulty(4));

        let result = node
            .handle("10.0.0.5:3000", Message::Addr(vec!["10.0.0.6:3000".to_string()]))
            .await;
        assert_eq!(result, Ok(Outcome::Ignored));
        assert!(transport.drain().await.is_empty());
    }

    #[test]
    fn test_handshake_error_mapping() {
        assert_eq!(
            Rejection::from(HandshakeError::AtCapacity(3)),
            Rejection::AtCapacity(3)
        );
        assert!(matches!(
            Rejection::from(HandshakeError::UnexpectedVerAck {
                addr: "x:1".to_string()
            }),
            Rejection::ProtocolViolation(_)
        ));
    }
}
