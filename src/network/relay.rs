//! Transaction relay and the mining trigger

use crate::config::{Role, MINING_THRESHOLD};
use crate::core::{Transaction, BLOCK_REWARD};
use crate::mining::MempoolError;
use crate::network::message::{InvKind, Message};
use crate::network::node::{HandleResult, Node, Outcome, Rejection};
use std::collections::HashSet;

impl Node {
    pub(crate) async fn on_tx(&self, remote: &str, tx: Transaction) -> HandleResult {
        if tx.claims_coinbase() {
            return Err(Rejection::Invalid(format!(
                "coinbase transaction {} relayed by {}",
                tx.id, remote
            )));
        }
        tx.check_structure()
            .map_err(|e| Rejection::Invalid(format!("transaction {}: {}", tx.id, e)))?;

        let tx_id = tx.id.clone();
        let pending = {
            let mut mempool = self.mempool.write().await;
            mempool.insert(tx).map_err(|e| match e {
                MempoolError::Duplicate(id) => Rejection::Duplicate {
                    kind: InvKind::Tx,
                    id,
                },
                MempoolError::Coinbase(id) => Rejection::Invalid(format!("coinbase {}", id)),
            })?;
            mempool.len()
        };
        log::info!("Transaction {} admitted ({} pending)", tx_id, pending);

        match self.config.role() {
            Role::Bootstrap => {
                let targets: Vec<String> = self
                    .config
                    .other_nodes()
                    .filter(|addr| *addr != remote)
                    .map(str::to_string)
                    .collect();
                for target in &targets {
                    self.send(
                        target,
                        Message::Inv {
                            kind: InvKind::Tx,
                            items: vec![tx_id.clone()],
                        },
                    )
                    .await;
                }
                Ok(Outcome::TxAdmitted {
                    relayed_to: targets,
                })
            }
            Role::Miner if pending >= MINING_THRESHOLD => self.mine_pending().await,
            Role::Miner | Role::Relay => Ok(Outcome::TxAdmitted {
                relayed_to: Vec::new(),
            }),
        }
    }

    /// Mine rounds until fewer than [`MINING_THRESHOLD`] transactions are
    /// pending or none of them can be mined. Rounds never overlap.
    async fn mine_pending(&self) -> HandleResult {
        let miner_address = match &self.config.mining_address {
            Some(address) => address.clone(),
            None => return Ok(Outcome::MiningSkipped),
        };
        let _round = self.mining.lock().await;
        let mut mined = Vec::new();

        loop {
            let pending = {
                let mempool = self.mempool.read().await;
                if mempool.len() < MINING_THRESHOLD {
                    break;
                }
                mempool.snapshot()
            };

            let selected = self.select_mineable(pending).await;
            if selected.is_empty() {
                log::info!("No pending transaction verifies; not mining");
                break;
            }
            let tx_ids: Vec<String> = selected.iter().map(|tx| tx.id.clone()).collect();

            let height = self.chain.best_height().await + 1;
            let mut transactions = Vec::with_capacity(selected.len() + 1);
            transactions.push(Transaction::coinbase(&miner_address, BLOCK_REWARD, height));
            transactions.extend(selected);

            let block = match self
                .producer
                .mine_block(self.chain.as_ref(), transactions)
                .await
            {
                Ok(block) => block,
                Err(e) => {
                    log::warn!("Mining round failed: {}", e);
                    break;
                }
            };
            self.chain.rebuild_utxo_index().await;

            self.mempool
                .write()
                .await
                .remove_all(tx_ids.iter().map(String::as_str));
            log::info!(
                "Mined block {} with {} transactions",
                block.hash,
                tx_ids.len()
            );

            for target in self.config.other_nodes() {
                self.send(
                    target,
                    Message::Inv {
                        kind: InvKind::Block,
                        items: vec![block.hash.clone()],
                    },
                )
                .await;
            }
            mined.push(block.hash);
        }

        if mined.is_empty() {
            Ok(Outcome::MiningSkipped)
        } else {
            Ok(Outcome::Mined { blocks: mined })
        }
    }

    /// Verified transactions in arrival order, skipping any that spend an
    /// output already claimed by an earlier pick
    async fn select_mineable(&self, pending: Vec<Transaction>) -> Vec<Transaction> {
        let mut claimed = HashSet::new();
        let mut selected = Vec::new();

        for tx in pending {
            if tx.inputs.iter().any(|input| claimed.contains(&input.outpoint())) {
                log::debug!("Transaction {} conflicts with this round, deferred", tx.id);
                continue;
            }
            if !self.verifier.verify(&tx, self.chain.as_ref()).await {
                log::debug!("Transaction {} does not verify, left pending", tx.id);
                continue;
            }
            claimed.extend(tx.inputs.iter().map(|input| input.outpoint()));
            selected.push(tx);
        }
        selected
    }
}
