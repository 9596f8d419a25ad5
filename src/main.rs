//! Relay node CLI
//!
//! Runs a P2P node or generates a key pair for a mining payout address.

use chain_relay::config::{NodeConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_CONNECT_PEER};
use chain_relay::core::{Blockchain, SharedChain, UtxoVerifier, DEFAULT_DIFFICULTY};
use chain_relay::crypto::KeyPair;
use chain_relay::mining::Miner;
use chain_relay::network::{Node, Server, TcpTransport};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "relay-node")]
#[command(version = "0.1.0")]
#[command(about = "Peer-to-peer message core of a minimal blockchain node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the P2P node
    Start {
        /// Address to listen on, as peers know it (host:port)
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        address: String,

        /// Known nodes, comma-separated; the first is the bootstrap node
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        known_nodes: String,

        /// Payout address for mined blocks; enables mining
        #[arg(short, long)]
        mining_address: Option<String>,

        /// Maximum handshakes in progress at once
        #[arg(long, default_value_t = DEFAULT_MAX_CONNECT_PEER)]
        max_connect_peer: usize,

        /// Mining difficulty (number of leading zero bits)
        #[arg(short, long, default_value_t = DEFAULT_DIFFICULTY)]
        difficulty: u32,

        /// Seconds before an unfinished handshake is abandoned
        #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT.as_secs())]
        handshake_timeout: u64,
    },

    /// Generate a key pair and print its address
    Keygen,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            address,
            known_nodes,
            mining_address,
            max_connect_peer,
            difficulty,
            handshake_timeout,
        } => {
            let config = NodeConfig {
                node_address: address,
                known_nodes: known_nodes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                mining_address,
                max_connect_peer,
                handshake_timeout: Duration::from_secs(handshake_timeout),
                difficulty,
            };
            config.validate()?;
            run_node(config)?;
        }

        Commands::Keygen => {
            let key_pair = KeyPair::generate();
            println!("Address:     {}", key_pair.address());
            println!("Public key:  {}", key_pair.public_key_hex());
            println!("Private key: {}", key_pair.private_key_hex());
        }
    }

    Ok(())
}

fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let server = Server::bind(&config.node_address).await?;
        log::info!(
            "Starting {:?} node on {} (difficulty {})",
            config.role(),
            config.node_address,
            config.difficulty
        );

        let chain = SharedChain::new(Blockchain::with_difficulty(config.difficulty));
        let transport = TcpTransport::new(config.node_address.clone());
        let node = Arc::new(Node::new(
            config,
            Arc::new(chain),
            Arc::new(UtxoVerifier),
            Arc::new(Miner::new()),
            Arc::new(transport),
        ));

        tokio::select! {
            _ = node.clone().run(server) => {}
            _ = tokio::signal::ctrl_c() => {
                let status = node.status().await;
                log::info!(
                    "Shutting down at height {} ({} active peers, {} pending tx)",
                    status.height,
                    status.active_peers.len(),
                    status.pending_tx
                );
            }
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
