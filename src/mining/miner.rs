//! Proof-of-work block production

use crate::core::{Block, BlockchainError, ChainStore, Transaction};
use async_trait::async_trait;
use log::info;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MiningError {
    #[error("No transactions to mine")]
    NoTransactions,
    #[error("Mined block rejected by chain: {0}")]
    Rejected(#[from] BlockchainError),
    #[error("Mining task failed: {0}")]
    Task(String),
}

/// Turns a transaction set into a block appended to `chain`
#[async_trait]
pub trait BlockProducer: Send + Sync {
    async fn mine_block(
        &self,
        chain: &dyn ChainStore,
        transactions: Vec<Transaction>,
    ) -> Result<Block, MiningError>;
}

/// CPU miner. The nonce search runs on the blocking pool with no chain lock
/// held; the block is appended afterwards, so a tip that moved in the
/// meantime surfaces as [`MiningError::Rejected`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Miner;

impl Miner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BlockProducer for Miner {
    async fn mine_block(
        &self,
        chain: &dyn ChainStore,
        transactions: Vec<Transaction>,
    ) -> Result<Block, MiningError> {
        if transactions.is_empty() {
            return Err(MiningError::NoTransactions);
        }

        let tip = chain.tip().await;
        let start = Instant::now();

        let (block, attempts) = tokio::task::spawn_blocking(move || {
            let mut block = Block::new(tip.height + 1, tip.hash, transactions, tip.difficulty);
            info!(
                "Mining block {} with difficulty {}...",
                block.index, block.header.difficulty
            );
            let attempts = block.mine();
            (block, attempts)
        })
        .await
        .map_err(|e| MiningError::Task(e.to_string()))?;

        let elapsed = start.elapsed().as_millis();
        let hash_rate = if elapsed > 0 {
            attempts as f64 / (elapsed as f64 / 1000.0)
        } else {
            attempts as f64
        };
        info!(
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            block.index, elapsed, attempts, hash_rate
        );

        chain.append_block(block.clone()).await?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Blockchain, SharedChain, BLOCK_REWARD};

    #[tokio::test]
    async fn test_mined_block_extends_chain() {
        let chain = SharedChain::new(Blockchain::with_difficulty(4));
        let coinbase = Transaction::coinbase("miner", BLOCK_REWARD, 1);

        let block = Miner::new()
            .mine_block(&chain, vec![coinbase.clone()])
            .await
            .unwrap();

        assert_eq!(block.index, 1);
        assert!(block.is_valid_pow());
        assert_eq!(block.transactions, vec![coinbase]);
        assert_eq!(chain.best_height().await, 1);
        assert_eq!(chain.block_hashes().await, vec![block.hash]);
    }

    #[tokio::test]
    async fn test_empty_set_rejected() {
        let chain = SharedChain::new(Blockchain::with_difficulty(4));
        let result = Miner::new().mine_block(&chain, vec![]).await;
        assert!(matches!(result, Err(MiningError::NoTransactions)));
        assert_eq!(chain.best_height().await, 0);
    }
}
