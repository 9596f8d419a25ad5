//! Chain-side collaborators of the network core
//!
//! - Transactions and blocks (UTXO model, proof of work)
//! - An in-memory chain with a UTXO index
//! - The [`ChainStore`] and [`TxVerifier`] seams the protocol handlers use

pub mod block;
pub mod blockchain;
pub mod store;
pub mod transaction;
pub mod verify;

pub use block::{Block, BlockHeader, GENESIS_TIMESTAMP};
pub use blockchain::{Blockchain, BlockchainError, BLOCK_REWARD, DEFAULT_DIFFICULTY};
pub use store::{ChainStore, ChainTip, SharedChain};
pub use transaction::{
    outpoint_key, Transaction, TransactionBuilder, TransactionError, TransactionInput,
    TransactionOutput, Utxo, TX_VERSION,
};
pub use verify::{TxVerifier, UtxoVerifier};
