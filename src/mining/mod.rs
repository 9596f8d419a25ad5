//! Mempool and block production

pub mod mempool;
pub mod miner;

pub use mempool::{Mempool, MempoolError};
pub use miner::{BlockProducer, Miner, MiningError};
