//! Chain store seam used by the network core
//!
//! The protocol handlers only ever talk to the chain through [`ChainStore`],
//! so they never hold one of their own locks across a chain call.

use crate::core::block::Block;
use crate::core::blockchain::{Blockchain, BlockchainError};
use crate::core::transaction::Utxo;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Snapshot of the chain tip, enough to build the next block on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub height: u64,
    pub hash: String,
    pub difficulty: u32,
}

#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Height of the best block, genesis is 0
    async fn best_height(&self) -> u64;

    async fn tip(&self) -> ChainTip;

    /// Hashes of every block above genesis, lowest height first
    async fn block_hashes(&self) -> Vec<String>;

    async fn get_block(&self, hash: &str) -> Option<Block>;

    async fn append_block(&self, block: Block) -> Result<(), BlockchainError>;

    /// Recompute the unspent-output index from the whole chain
    async fn rebuild_utxo_index(&self);

    async fn find_utxo(&self, tx_id: &str, output_index: u32) -> Option<Utxo>;
}

/// [`Blockchain`] behind an async read/write lock
#[derive(Clone, Default)]
pub struct SharedChain {
    inner: Arc<RwLock<Blockchain>>,
}

impl SharedChain {
    pub fn new(chain: Blockchain) -> Self {
        Self {
            inner: Arc::new(RwLock::new(chain)),
        }
    }

    /// Direct access for seeding and inspection
    pub fn inner(&self) -> &Arc<RwLock<Blockchain>> {
        &self.inner
    }
}

#[async_trait]
impl ChainStore for SharedChain {
    async fn best_height(&self) -> u64 {
        self.inner.read().await.height()
    }

    async fn tip(&self) -> ChainTip {
        let chain = self.inner.read().await;
        ChainTip {
            height: chain.height(),
            hash: chain.latest_block().hash.clone(),
            difficulty: chain.difficulty,
        }
    }

    async fn block_hashes(&self) -> Vec<String> {
        self.inner.read().await.block_hashes()
    }

    async fn get_block(&self, hash: &str) -> Option<Block> {
        self.inner.read().await.get_block_by_hash(hash).cloned()
    }

    async fn append_block(&self, block: Block) -> Result<(), BlockchainError> {
        let mut chain = self.inner.write().await;
        chain.add_block(block)?;
        log::info!("Chain height now {}", chain.height());
        Ok(())
    }

    async fn rebuild_utxo_index(&self) {
        let mut chain = self.inner.write().await;
        chain.rebuild_utxo_set();
        log::debug!("Rebuilt UTXO index at height {}", chain.height());
    }

    async fn find_utxo(&self, tx_id: &str, output_index: u32) -> Option<Utxo> {
        self.inner
            .read()
            .await
            .find_utxo(tx_id, output_index)
            .cloned()
    }
}
