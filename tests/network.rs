//! Multi-node protocol scenarios over an in-memory network

use async_trait::async_trait;
use chain_relay::config::NodeConfig;
use chain_relay::core::{
    Block, Blockchain, BlockchainError, ChainStore, ChainTip, SharedChain, Transaction,
    TransactionBuilder, Utxo, UtxoVerifier,
};
use chain_relay::crypto::KeyPair;
use chain_relay::mining::Miner;
use chain_relay::network::{
    Envelope, InvKind, MemoryTransport, Message, Node, Outbox, Outcome, Rejection, VersionMessage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const BOOTSTRAP: &str = "127.0.0.1:3000";
const MINER: &str = "127.0.0.1:3001";
const WALLET: &str = "127.0.0.1:3002";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivery {
    from: String,
    to: String,
    kind: &'static str,
}

/// Nodes sharing one outbox; `run` delivers queued envelopes in FIFO order
/// until the network is quiet.
struct TestNet {
    outbox: Outbox,
    nodes: HashMap<String, Arc<Node>>,
}

impl TestNet {
    fn new() -> Self {
        Self {
            outbox: Outbox::default(),
            nodes: HashMap::new(),
        }
    }

    fn add(&mut self, config: NodeConfig, chain: Arc<dyn ChainStore>) -> Arc<Node> {
        let address = config.node_address.clone();
        let transport = MemoryTransport::with_outbox(address.clone(), self.outbox.clone());
        let node = Arc::new(Node::new(
            config,
            chain,
            Arc::new(UtxoVerifier),
            Arc::new(Miner::new()),
            Arc::new(transport),
        ));
        self.nodes.insert(address, node.clone());
        node
    }

    async fn inject(&self, from: &str, to: &str, message: Message) {
        self.outbox
            .lock()
            .await
            .push_back((to.to_string(), Envelope::new(from, message)));
    }

    async fn run(&self) -> Vec<Delivery> {
        let mut log = Vec::new();
        loop {
            let next = self.outbox.lock().await.pop_front();
            let Some((to, envelope)) = next else { break };

            log.push(Delivery {
                from: envelope.from.clone(),
                to: to.clone(),
                kind: envelope.message.type_name(),
            });
            if let Some(node) = self.nodes.get(&to) {
                let _ = node.handle(&envelope.from, envelope.message).await;
            }
            assert!(log.len() < 10_000, "network did not settle");
        }
        log
    }
}

/// Counts UTXO index rebuilds on top of a [`SharedChain`]
struct CountingChain {
    inner: SharedChain,
    reindexes: AtomicUsize,
}

impl CountingChain {
    fn new(chain: Blockchain) -> Self {
        Self {
            inner: SharedChain::new(chain),
            reindexes: AtomicUsize::new(0),
        }
    }

    fn reindexes(&self) -> usize {
        self.reindexes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainStore for CountingChain {
    async fn best_height(&self) -> u64 {
        self.inner.best_height().await
    }

    async fn tip(&self) -> ChainTip {
        self.inner.tip().await
    }

    async fn block_hashes(&self) -> Vec<String> {
        self.inner.block_hashes().await
    }

    async fn get_block(&self, hash: &str) -> Option<Block> {
        self.inner.get_block(hash).await
    }

    async fn append_block(&self, block: Block) -> Result<(), BlockchainError> {
        self.inner.append_block(block).await
    }

    async fn rebuild_utxo_index(&self) {
        self.reindexes.fetch_add(1, Ordering::SeqCst);
        self.inner.rebuild_utxo_index().await
    }

    async fn find_utxo(&self, tx_id: &str, output_index: u32) -> Option<Utxo> {
        self.inner.find_utxo(tx_id, output_index).await
    }
}

fn config(address: &str, mining_address: Option<String>) -> NodeConfig {
    NodeConfig {
        node_address: address.to_string(),
        known_nodes: vec![BOOTSTRAP.into(), MINER.into(), WALLET.into()],
        mining_address,
        difficulty: 4,
        ..Default::default()
    }
}

fn empty_chain() -> Arc<SharedChain> {
    Arc::new(SharedChain::new(Blockchain::with_difficulty(4)))
}

fn chain_paying(owner: &str, blocks: usize) -> Blockchain {
    let mut chain = Blockchain::with_difficulty(4);
    for _ in 0..blocks {
        chain.mine_block(vec![], owner).unwrap();
    }
    chain
}

fn spend(owner: &KeyPair, utxo: &Utxo, amount: u64) -> Transaction {
    TransactionBuilder::new()
        .add_input(utxo)
        .add_output("recipient", amount)
        .add_output(&owner.address(), utxo.output.amount - amount)
        .build_and_sign(owner)
        .unwrap()
}

fn count(log: &[Delivery], from: &str, to: &str, kind: &str) -> usize {
    log.iter()
        .filter(|d| d.from == from && d.to == to && d.kind == kind)
        .count()
}

#[tokio::test]
async fn handshake_leaves_both_sides_active() {
    let mut net = TestNet::new();
    let bootstrap = net.add(config(BOOTSTRAP, None), empty_chain());
    let wallet = net.add(config(WALLET, None), empty_chain());

    assert_eq!(
        wallet.initiate_handshake(BOOTSTRAP).await,
        Ok(Outcome::HandshakeStarted)
    );
    let log = net.run().await;

    assert!(bootstrap.peers().is_active(WALLET).await);
    assert!(wallet.peers().is_active(BOOTSTRAP).await);
    assert_eq!(bootstrap.peers().connecting_count().await, 0);
    assert_eq!(wallet.peers().connecting_count().await, 0);

    // Equal heights: nobody asks for blocks
    assert!(log.iter().all(|d| d.kind != "getblocks"));
    assert_eq!(count(&log, WALLET, BOOTSTRAP, "verack"), 1);
    assert_eq!(count(&log, BOOTSTRAP, WALLET, "verack"), 1);
}

#[tokio::test]
async fn lagging_node_catches_up_through_inventory() {
    let mut net = TestNet::new();
    let source = chain_paying("miner", 3);
    let expected = source.block_hashes();

    let bootstrap = net.add(config(BOOTSTRAP, None), Arc::new(SharedChain::new(source)));
    let lagging_chain = Arc::new(CountingChain::new(Blockchain::with_difficulty(4)));
    let lagging = net.add(config(WALLET, None), lagging_chain.clone());

    lagging.initiate_handshake(BOOTSTRAP).await.unwrap();
    let log = net.run().await;

    assert_eq!(lagging.chain().best_height().await, 3);
    assert_eq!(lagging.chain().block_hashes().await, expected);
    assert_eq!(bootstrap.chain().best_height().await, 3);

    assert_eq!(count(&log, WALLET, BOOTSTRAP, "getblocks"), 1);
    assert_eq!(count(&log, BOOTSTRAP, WALLET, "inv"), 1);
    assert_eq!(count(&log, WALLET, BOOTSTRAP, "getdata"), 3);
    assert_eq!(count(&log, BOOTSTRAP, WALLET, "block"), 3);

    assert!(lagging.fetch_queue().is_empty().await);
    assert_eq!(lagging_chain.reindexes(), 1);
}

#[tokio::test]
async fn handshakes_beyond_capacity_get_no_reply() {
    let mut net = TestNet::new();
    let mut cfg = config(BOOTSTRAP, None);
    cfg.max_connect_peer = 2;
    let bootstrap = net.add(cfg, empty_chain());

    for port in 4000..4003 {
        let remote = format!("10.0.0.1:{}", port);
        net.inject(&remote, BOOTSTRAP, Message::Version(VersionMessage::new(0)))
            .await;
    }
    let log = net.run().await;

    assert_eq!(bootstrap.peers().connecting_count().await, 2);
    assert!(bootstrap.peers().connection("10.0.0.1:4002").await.is_none());
    assert!(log.iter().all(|d| d.to != "10.0.0.1:4002"));
    assert_eq!(count(&log, BOOTSTRAP, "10.0.0.1:4000", "verack"), 1);
}

#[tokio::test]
async fn duplicate_transaction_is_admitted_once() {
    let owner = KeyPair::generate();
    let base = chain_paying(&owner.address(), 1);
    let utxo = base.utxos_for_address(&owner.address()).remove(0);
    let tx = spend(&owner, &utxo, 10);

    let mut net = TestNet::new();
    let bootstrap = net.add(config(BOOTSTRAP, None), Arc::new(SharedChain::new(base)));

    let first = bootstrap.handle(WALLET, Message::Tx(tx.clone())).await;
    let second = bootstrap.handle(WALLET, Message::Tx(tx.clone())).await;

    assert!(matches!(first, Ok(Outcome::TxAdmitted { .. })));
    assert_eq!(
        second,
        Err(Rejection::Duplicate {
            kind: InvKind::Tx,
            id: tx.id.clone()
        })
    );
    assert_eq!(bootstrap.mempool().read().await.len(), 1);

    // Only the first admission announced anything
    let log = net.run().await;
    assert_eq!(log.iter().filter(|d| d.kind == "inv").count(), 1);
}

#[tokio::test]
async fn coinbase_is_never_admitted() {
    let mut net = TestNet::new();
    let bootstrap = net.add(config(BOOTSTRAP, None), empty_chain());

    let coinbase = Transaction::coinbase(&KeyPair::generate().address(), 50, 1);
    let result = bootstrap.handle(WALLET, Message::Tx(coinbase.clone())).await;
    assert!(matches!(result, Err(Rejection::Invalid(_))));

    let mut unflagged = coinbase;
    unflagged.is_coinbase = false;
    unflagged.id = unflagged.calculate_hash();
    let result = bootstrap.handle(WALLET, Message::Tx(unflagged)).await;
    assert!(matches!(result, Err(Rejection::Invalid(_))));

    assert!(bootstrap.mempool().read().await.is_empty());
    assert!(net.run().await.is_empty());
}

#[tokio::test]
async fn transactions_relay_to_miner_and_blocks_flow_back() {
    let owner = KeyPair::generate();
    let miner_key = KeyPair::generate();
    let base = chain_paying(&owner.address(), 2);
    let utxos = base.utxos_for_address(&owner.address());

    let mut net = TestNet::new();
    let bootstrap = net.add(
        config(BOOTSTRAP, None),
        Arc::new(SharedChain::new(base.clone())),
    );
    let miner = net.add(
        config(MINER, Some(miner_key.address())),
        Arc::new(SharedChain::new(base.clone())),
    );
    let wallet = net.add(config(WALLET, None), Arc::new(SharedChain::new(base)));

    let txs: Vec<Transaction> = utxos.iter().map(|u| spend(&owner, u, 7)).collect();
    for tx in &txs {
        net.inject(WALLET, BOOTSTRAP, Message::Tx(tx.clone())).await;
    }
    let log = net.run().await;

    // The sender never hears its own transactions announced back
    assert_eq!(count(&log, BOOTSTRAP, WALLET, "inv"), 0);
    assert_eq!(count(&log, BOOTSTRAP, MINER, "inv"), 2);
    assert_eq!(count(&log, MINER, BOOTSTRAP, "getdata"), 2);

    for node in [&bootstrap, &miner, &wallet] {
        assert_eq!(node.chain().best_height().await, 3);
    }
    let tip = miner.chain().tip().await;
    assert_eq!(wallet.chain().tip().await.hash, tip.hash);

    assert!(miner.mempool().read().await.is_empty());
    assert!(bootstrap.mempool().read().await.is_empty());
    assert_eq!(
        miner.chain().find_utxo(&txs[0].id, 0).await.map(|u| u.output.amount),
        Some(7)
    );
}

#[tokio::test]
async fn mining_loop_drains_mempool_in_one_round() {
    let owner = KeyPair::generate();
    let base = chain_paying(&owner.address(), 3);
    let utxos = base.utxos_for_address(&owner.address());
    let txs: Vec<Transaction> = utxos.iter().map(|u| spend(&owner, u, 1)).collect();

    let mut net = TestNet::new();
    let miner_chain = Arc::new(SharedChain::new(base));
    let miner = net.add(
        config(MINER, Some(KeyPair::generate().address())),
        miner_chain.clone(),
    );

    {
        let mut mempool = miner.mempool().write().await;
        mempool.insert(txs[0].clone()).unwrap();
        mempool.insert(txs[1].clone()).unwrap();
    }
    let result = miner.handle(BOOTSTRAP, Message::Tx(txs[2].clone())).await;

    let blocks = match result {
        Ok(Outcome::Mined { blocks }) => blocks,
        other => panic!("expected one mining round, got {:?}", other),
    };
    assert_eq!(blocks.len(), 1);
    assert!(miner.mempool().read().await.is_empty());

    let block = miner_chain.get_block(&blocks[0]).await.unwrap();
    assert_eq!(block.transactions.len(), 4);
    assert_eq!(block.transactions.iter().filter(|tx| tx.is_coinbase).count(), 1);

    let log = net.run().await;
    let announcements: Vec<&str> = log
        .iter()
        .filter(|d| d.kind == "inv")
        .map(|d| d.to.as_str())
        .collect();
    assert_eq!(announcements, vec![BOOTSTRAP, WALLET]);
}
