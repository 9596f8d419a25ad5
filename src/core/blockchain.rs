//! In-memory chain with a UTXO index

use crate::core::block::Block;
use crate::core::transaction::{outpoint_key, Transaction, Utxo};
use std::collections::HashMap;
use thiserror::Error;

/// Default mining difficulty (leading zero bits)
pub const DEFAULT_DIFFICULTY: u32 = 16;

/// Coins paid by each block's coinbase
pub const BLOCK_REWARD: u64 = 50;

#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Duplicate block {0}")]
    DuplicateBlock(String),
}

#[derive(Debug, Clone)]
pub struct Blockchain {
    pub blocks: Vec<Block>,
    pub difficulty: u32,
    utxo_set: HashMap<String, Utxo>,
    /// Hash -> height
    by_hash: HashMap<String, u64>,
}

impl Blockchain {
    /// A chain holding only the genesis block for `difficulty`
    pub fn with_difficulty(difficulty: u32) -> Self {
        let genesis = Block::genesis(difficulty);
        let mut chain = Self {
            by_hash: HashMap::from([(genesis.hash.clone(), 0)]),
            blocks: vec![genesis],
            difficulty,
            utxo_set: HashMap::new(),
        };
        chain.rebuild_utxo_set();
        chain
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn latest_block(&self) -> &Block {
        // `blocks` always holds at least the genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    /// Height of the tip, genesis is 0
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.by_hash
            .get(hash)
            .and_then(|height| self.blocks.get(*height as usize))
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Hashes above genesis, lowest height first
    pub fn block_hashes(&self) -> Vec<String> {
        self.blocks.iter().skip(1).map(|b| b.hash.clone()).collect()
    }

    /// Validate `block` against the tip and append it
    pub fn add_block(&mut self, block: Block) -> Result<(), BlockchainError> {
        if self.contains(&block.hash) {
            return Err(BlockchainError::DuplicateBlock(block.hash));
        }
        self.validate_block(&block)?;

        self.apply_block_utxos(&block);
        self.by_hash.insert(block.hash.clone(), block.index);
        self.blocks.push(block);
        Ok(())
    }

    fn validate_block(&self, block: &Block) -> Result<(), BlockchainError> {
        let latest = self.latest_block();

        if block.index != latest.index + 1 {
            return Err(BlockchainError::InvalidBlock(format!(
                "expected height {}, got {}",
                latest.index + 1,
                block.index
            )));
        }
        if block.header.previous_hash != latest.hash {
            return Err(BlockchainError::InvalidBlock(
                "previous hash does not match tip".to_string(),
            ));
        }
        if block.header.difficulty != self.difficulty {
            return Err(BlockchainError::InvalidBlock(format!(
                "difficulty {} differs from chain difficulty {}",
                block.header.difficulty, self.difficulty
            )));
        }
        if !block.verify_hash() {
            return Err(BlockchainError::InvalidBlock("bad block hash".to_string()));
        }
        if !block.is_valid_pow() {
            return Err(BlockchainError::InvalidBlock(
                "insufficient proof of work".to_string(),
            ));
        }
        if !block.verify_merkle_root() {
            return Err(BlockchainError::InvalidBlock("bad merkle root".to_string()));
        }

        for (position, tx) in block.transactions.iter().enumerate() {
            tx.check_structure()
                .map_err(|e| BlockchainError::InvalidBlock(format!("transaction {}: {}", tx.id, e)))?;

            if tx.is_coinbase {
                if position != 0 {
                    return Err(BlockchainError::InvalidBlock(
                        "coinbase is not the first transaction".to_string(),
                    ));
                }
                if tx.total_output() > BLOCK_REWARD {
                    return Err(BlockchainError::InvalidBlock(format!(
                        "coinbase pays {}, more than the reward {}",
                        tx.total_output(),
                        BLOCK_REWARD
                    )));
                }
            }

            let signed = tx
                .verify_signatures()
                .map_err(|e| BlockchainError::InvalidBlock(e.to_string()))?;
            if !signed {
                return Err(BlockchainError::InvalidBlock(format!(
                    "bad signature in transaction {}",
                    tx.id
                )));
            }
        }

        Ok(())
    }

    /// Recompute the UTXO index from every block
    pub fn rebuild_utxo_set(&mut self) {
        let mut utxo_set = HashMap::new();
        for block in &self.blocks {
            for tx in &block.transactions {
                Self::apply_transaction(&mut utxo_set, tx);
            }
        }
        self.utxo_set = utxo_set;
    }

    fn apply_block_utxos(&mut self, block: &Block) {
        for tx in &block.transactions {
            Self::apply_transaction(&mut self.utxo_set, tx);
        }
    }

    fn apply_transaction(utxo_set: &mut HashMap<String, Utxo>, tx: &Transaction) {
        if !tx.is_coinbase {
            for input in &tx.inputs {
                utxo_set.remove(&input.outpoint());
            }
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            let utxo = Utxo {
                tx_id: tx.id.clone(),
                output_index: index as u32,
                output: output.clone(),
            };
            utxo_set.insert(utxo.outpoint(), utxo);
        }
    }

    pub fn find_utxo(&self, tx_id: &str, output_index: u32) -> Option<&Utxo> {
        self.utxo_set.get(&outpoint_key(tx_id, output_index))
    }

    pub fn utxos_for_address(&self, address: &str) -> Vec<Utxo> {
        self.utxo_set
            .values()
            .filter(|utxo| utxo.output.recipient == address)
            .cloned()
            .collect()
    }

    /// Mine and append a block of `transactions` plus a coinbase paying
    /// `miner_address`. Used to seed chains in tests and demos.
    pub fn mine_block(
        &mut self,
        transactions: Vec<Transaction>,
        miner_address: &str,
    ) -> Result<Block, BlockchainError> {
        let coinbase = Transaction::coinbase(miner_address, BLOCK_REWARD, self.height() + 1);

        let mut all_transactions = vec![coinbase];
        all_transactions.extend(transactions);

        let mut block = Block::new(
            self.height() + 1,
            self.latest_block().hash.clone(),
            all_transactions,
            self.difficulty,
        );
        block.mine();

        self.add_block(block.clone())?;
        Ok(block)
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::with_difficulty(DEFAULT_DIFFICULTY)
    }
}
