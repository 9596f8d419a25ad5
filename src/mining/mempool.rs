//! Pending transactions waiting to be mined
//!
//! The mempool itself is a plain map; the node guards it with a lock so that
//! the duplicate check and the insert happen in one critical section.

use crate::core::Transaction;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Transaction {0} already in mempool")]
    Duplicate(String),
    #[error("Coinbase transaction {0} cannot enter the mempool")]
    Coinbase(String),
}

#[derive(Debug, Default)]
pub struct Mempool {
    entries: HashMap<String, Transaction>,
    /// Ids in arrival order
    by_time: Vec<String>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `tx` unless its id is already present
    pub fn insert(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        if tx.claims_coinbase() {
            return Err(MempoolError::Coinbase(tx.id));
        }
        if self.entries.contains_key(&tx.id) {
            return Err(MempoolError::Duplicate(tx.id));
        }

        let id = tx.id.clone();
        self.by_time.push(id.clone());
        self.entries.insert(id, tx);
        Ok(())
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.entries.contains_key(tx_id)
    }

    pub fn get(&self, tx_id: &str) -> Option<&Transaction> {
        self.entries.get(tx_id)
    }

    /// Remove every listed id; returns how many were present
    pub fn remove_all<'a, I>(&mut self, tx_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut removed = 0;
        for id in tx_ids {
            if self.entries.remove(id).is_some() {
                removed += 1;
            }
        }
        let entries = &self.entries;
        self.by_time.retain(|id| entries.contains_key(id));
        removed
    }

    /// Clones of all pending transactions, oldest first
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.by_time
            .iter()
            .filter_map(|id| self.entries.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
