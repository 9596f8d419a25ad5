//! UTXO transactions
//!
//! A transaction spends outputs of earlier transactions (its inputs) and
//! creates new outputs. Coinbase transactions have a single synthetic input
//! and are only ever created locally by a miner.

use crate::crypto::{public_key_from_hex, sha256, verify_signature, KeyError, KeyPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use thiserror::Error;

/// Current transaction version
pub const TX_VERSION: u32 = 1;

/// Previous-output id carried by the synthetic coinbase input
pub const COINBASE_INPUT_ID: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Transaction has no outputs")]
    NoOutputs,
    #[error("Transaction id {claimed} does not match its contents ({actual})")]
    IdMismatch { claimed: String, actual: String },
    #[error("Only a coinbase may spend the coinbase input")]
    CoinbaseInput,
    #[error("Coinbase must have exactly one coinbase input")]
    MalformedCoinbase,
    #[error("Crypto error: {0}")]
    Crypto(#[from] KeyError),
}

/// Reference to an output of a previous transaction, plus the proof of
/// ownership
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionInput {
    /// Id of the transaction holding the spent output
    pub tx_id: String,
    /// Position of the spent output in that transaction
    pub output_index: u32,
    /// Hex compact ECDSA signature over [`Transaction::signing_data`]
    pub signature: String,
    /// Hex compressed public key of the owner
    pub public_key: String,
}

impl TransactionInput {
    /// `tx_id:index` key of the spent output
    pub fn outpoint(&self) -> String {
        outpoint_key(&self.tx_id, self.output_index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionOutput {
    pub amount: u64,
    /// Address of the recipient
    pub recipient: String,
}

/// An unspent output as tracked by the chain's UTXO index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Utxo {
    pub tx_id: String,
    pub output_index: u32,
    pub output: TransactionOutput,
}

impl Utxo {
    pub fn outpoint(&self) -> String {
        outpoint_key(&self.tx_id, self.output_index)
    }
}

/// Key used by the UTXO index for an output
pub fn outpoint_key(tx_id: &str, output_index: u32) -> String {
    format!("{}:{}", tx_id, output_index)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    /// Hex SHA-256 over the transaction contents
    pub id: String,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub timestamp: DateTime<Utc>,
    pub is_coinbase: bool,
}

impl Transaction {
    /// Create an unsigned transaction
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        let mut tx = Self {
            version: TX_VERSION,
            id: String::new(),
            inputs,
            outputs,
            timestamp: Utc::now(),
            is_coinbase: false,
        };
        tx.id = tx.calculate_hash();
        tx
    }

    /// Create the block reward transaction for a block at `block_height`
    pub fn coinbase(recipient: &str, amount: u64, block_height: u64) -> Self {
        let input = TransactionInput {
            tx_id: COINBASE_INPUT_ID.to_string(),
            output_index: block_height as u32,
            signature: String::new(),
            public_key: String::new(),
        };
        let output = TransactionOutput {
            amount,
            recipient: recipient.to_string(),
        };

        let mut tx = Self::new(vec![input], vec![output]);
        tx.is_coinbase = true;
        tx.id = tx.calculate_hash();
        tx
    }

    pub fn calculate_hash(&self) -> String {
        let mut data = format!("{}|{}|{}|", self.version, self.timestamp, self.is_coinbase);
        for input in &self.inputs {
            let _ = write!(
                data,
                "{}:{}:{}:{}|",
                input.tx_id, input.output_index, input.signature, input.public_key
            );
        }
        for output in &self.outputs {
            let _ = write!(data, "{}:{}|", output.recipient, output.amount);
        }
        hex::encode(sha256(data.as_bytes()))
    }

    /// Digest the inputs sign: everything except signatures and public keys
    pub fn signing_data(&self) -> Vec<u8> {
        let mut data = format!("{}|{}|{}|", self.version, self.timestamp, self.is_coinbase);
        for input in &self.inputs {
            let _ = write!(data, "{}|", input.outpoint());
        }
        for output in &self.outputs {
            let _ = write!(data, "{}:{}|", output.recipient, output.amount);
        }
        sha256(data.as_bytes())
    }

    /// Sign every input with `key_pair` and refresh the id
    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<(), TransactionError> {
        let digest = self.signing_data();
        let public_key = key_pair.public_key_hex();

        for input in &mut self.inputs {
            input.signature = hex::encode(key_pair.sign(&digest)?);
            input.public_key = public_key.clone();
        }

        self.id = self.calculate_hash();
        Ok(())
    }

    /// Check every input signature against the public key it carries.
    ///
    /// Ownership of the spent outputs is not checked here; see
    /// [`crate::core::UtxoVerifier`].
    pub fn verify_signatures(&self) -> Result<bool, TransactionError> {
        if self.is_coinbase {
            return Ok(true);
        }

        let digest = self.signing_data();
        for input in &self.inputs {
            if input.signature.is_empty() || input.public_key.is_empty() {
                return Ok(false);
            }

            let public_key = public_key_from_hex(&input.public_key)?;
            let signature =
                hex::decode(&input.signature).map_err(|_| TransactionError::InvalidSignature)?;
            if !verify_signature(&public_key, &digest, &signature)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Built like a coinbase: a single synthetic input, whatever the flag says
    pub fn is_coinbase_shaped(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].tx_id == COINBASE_INPUT_ID
    }

    /// Flagged as a coinbase or built like one
    pub fn claims_coinbase(&self) -> bool {
        self.is_coinbase || self.is_coinbase_shaped()
    }

    /// Structural checks that do not need chain state
    pub fn check_structure(&self) -> Result<(), TransactionError> {
        if self.outputs.is_empty() {
            return Err(TransactionError::NoOutputs);
        }

        let actual = self.calculate_hash();
        if self.id != actual {
            return Err(TransactionError::IdMismatch {
                claimed: self.id.clone(),
                actual,
            });
        }

        if self.is_coinbase {
            if !self.is_coinbase_shaped() {
                return Err(TransactionError::MalformedCoinbase);
            }
        } else if self.inputs.iter().any(|i| i.tx_id == COINBASE_INPUT_ID) {
            return Err(TransactionError::CoinbaseInput);
        }
        Ok(())
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// Builder for spending transactions
#[derive(Default)]
pub struct TransactionBuilder {
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend `utxo`
    pub fn add_input(mut self, utxo: &Utxo) -> Self {
        self.inputs.push(TransactionInput {
            tx_id: utxo.tx_id.clone(),
            output_index: utxo.output_index,
            signature: String::new(),
            public_key: String::new(),
        });
        self
    }

    pub fn add_output(mut self, recipient: &str, amount: u64) -> Self {
        self.outputs.push(TransactionOutput {
            amount,
            recipient: recipient.to_string(),
        });
        self
    }

    pub fn build(self) -> Transaction {
        Transaction::new(self.inputs, self.outputs)
    }

    pub fn build_and_sign(self, key_pair: &KeyPair) -> Result<Transaction, TransactionError> {
        let mut tx = self.build();
        tx.sign(key_pair)?;
        Ok(tx)
    }
}
