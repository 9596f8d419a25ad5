//! Transaction verification against the unspent-output index

use crate::core::store::ChainStore;
use crate::core::transaction::Transaction;
use crate::crypto::{public_key_from_hex, public_key_to_address};
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait TxVerifier: Send + Sync {
    /// Whether `tx` may be mined on top of `chain`
    async fn verify(&self, tx: &Transaction, chain: &dyn ChainStore) -> bool;
}

/// Requires every input to spend a distinct unspent output owned by the key
/// that signed it, inputs to cover outputs, and all signatures to verify.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtxoVerifier;

#[async_trait]
impl TxVerifier for UtxoVerifier {
    async fn verify(&self, tx: &Transaction, chain: &dyn ChainStore) -> bool {
        if tx.claims_coinbase() || tx.inputs.is_empty() || tx.check_structure().is_err() {
            return false;
        }

        let mut spent = HashSet::new();
        let mut input_total: u64 = 0;
        for input in &tx.inputs {
            if !spent.insert(input.outpoint()) {
                return false;
            }

            let utxo = match chain.find_utxo(&input.tx_id, input.output_index).await {
                Some(utxo) => utxo,
                None => {
                    log::debug!("Transaction {} spends unknown output {}", tx.id, input.outpoint());
                    return false;
                }
            };

            let owner = match public_key_from_hex(&input.public_key) {
                Ok(key) => public_key_to_address(&key),
                Err(_) => return false,
            };
            if owner != utxo.output.recipient {
                return false;
            }

            input_total = input_total.saturating_add(utxo.output.amount);
        }

        if input_total < tx.total_output() {
            return false;
        }

        tx.verify_signatures().unwrap_or(false)
    }
}
