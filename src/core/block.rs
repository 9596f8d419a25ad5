//! Blocks and proof of work

use crate::core::transaction::{
    Transaction, TransactionInput, TransactionOutput, COINBASE_INPUT_ID, TX_VERSION,
};
use crate::crypto::{double_sha256, meets_difficulty, merkle_root};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Unix time shared by every node's genesis block
pub const GENESIS_TIMESTAMP: i64 = 1_700_000_000;

/// Recipient of the (zero valued) genesis output
pub const GENESIS_RECIPIENT: &str = "genesis";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: DateTime<Utc>,
    /// Required number of leading zero bits of the block hash
    pub difficulty: u32,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> String {
        let data = format!(
            "{}{}{}{}{}{}",
            self.version,
            self.previous_hash,
            self.merkle_root,
            self.timestamp.timestamp(),
            self.difficulty,
            self.nonce
        );
        hex::encode(double_sha256(data.as_bytes()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// Height of the block, genesis is 0
    pub index: u64,
    pub header: BlockHeader,
    /// Cached header hash
    pub hash: String,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create an unmined block on top of `previous_hash`
    pub fn new(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> Self {
        Self::with_timestamp(index, previous_hash, transactions, difficulty, Utc::now())
    }

    fn with_timestamp(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        difficulty: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let header = BlockHeader {
            version: 1,
            previous_hash,
            merkle_root: Self::calculate_merkle_root(&transactions),
            timestamp,
            difficulty,
            nonce: 0,
        };
        let hash = header.hash();

        Self {
            index,
            header,
            hash,
            transactions,
        }
    }

    /// The genesis block.
    ///
    /// Every field is fixed, so two nodes configured with the same difficulty
    /// agree on the genesis hash without exchanging it.
    pub fn genesis(difficulty: u32) -> Self {
        let timestamp = Utc
            .timestamp_opt(GENESIS_TIMESTAMP, 0)
            .single()
            .unwrap_or_default();

        let mut coinbase = Transaction {
            version: TX_VERSION,
            id: String::new(),
            inputs: vec![TransactionInput {
                tx_id: COINBASE_INPUT_ID.to_string(),
                output_index: 0,
                signature: String::new(),
                public_key: String::new(),
            }],
            outputs: vec![TransactionOutput {
                amount: 0,
                recipient: GENESIS_RECIPIENT.to_string(),
            }],
            timestamp,
            is_coinbase: true,
        };
        coinbase.id = coinbase.calculate_hash();

        let mut block =
            Self::with_timestamp(0, "0".repeat(64), vec![coinbase], difficulty, timestamp);
        block.mine();
        block
    }

    fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        let leaves: Vec<Vec<u8>> = transactions
            .iter()
            .map(|tx| hex::decode(&tx.id).unwrap_or_default())
            .collect();
        hex::encode(merkle_root(&leaves))
    }

    /// Search nonces until the hash meets the difficulty; returns the number
    /// of attempts
    pub fn mine(&mut self) -> u64 {
        let mut attempts = 0u64;
        loop {
            self.header.nonce = attempts;
            self.hash = self.header.hash();
            attempts += 1;

            if self.is_valid_pow() || attempts == u64::MAX {
                return attempts;
            }
        }
    }

    pub fn is_valid_pow(&self) -> bool {
        let hash = hex::decode(&self.hash).unwrap_or_default();
        meets_difficulty(&hash, self.header.difficulty)
    }

    pub fn verify_merkle_root(&self) -> bool {
        Self::calculate_merkle_root(&self.transactions) == self.header.merkle_root
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.header.hash()
    }

    /// Wire form carried by `block` messages
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
