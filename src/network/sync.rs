//! Inventory sync: getblocks / inv / getdata / block
//!
//! Catch-up runs one block at a time. An `inv[block]` replaces the fetch
//! queue and requests its first entry; every newly stored block requests the
//! next queued id from the same peer, and the delivery that finds the queue
//! empty rebuilds the UTXO index once for the whole batch. A block we already
//! hold is ignored unless it is the one in flight.

use crate::core::{Block, BlockchainError};
use crate::network::message::{InvKind, Message};
use crate::network::node::{HandleResult, Node, Outcome, Rejection};

impl Node {
    pub(crate) async fn on_get_blocks(&self, remote: &str) -> HandleResult {
        let items = self.chain.block_hashes().await;
        log::debug!("Announcing {} blocks to {}", items.len(), remote);

        self.send(
            remote,
            Message::Inv {
                kind: InvKind::Block,
                items,
            },
        )
        .await;
        Ok(Outcome::Replied)
    }

    pub(crate) async fn on_inv(
        &self,
        remote: &str,
        kind: InvKind,
        items: Vec<String>,
    ) -> HandleResult {
        if items.is_empty() {
            return Err(Rejection::ProtocolViolation(format!("empty {} inventory", kind)));
        }

        let id = match kind {
            InvKind::Block => {
                log::info!("{} announced {} blocks", remote, items.len());
                self.fetch_queue
                    .replace_and_take_first(items)
                    .await
                    .ok_or_else(|| Rejection::ProtocolViolation("empty block inventory".into()))?
            }
            InvKind::Tx => {
                // Only single-item tx announcements are produced by peers
                let id = items.into_iter().next().unwrap_or_default();
                if self.mempool.read().await.contains(&id) {
                    return Ok(Outcome::Ignored);
                }
                id
            }
        };

        self.send(
            remote,
            Message::GetData {
                kind,
                id: id.clone(),
            },
        )
        .await;
        Ok(Outcome::Requested { kind, id })
    }

    pub(crate) async fn on_get_data(&self, remote: &str, kind: InvKind, id: String) -> HandleResult {
        let message = match kind {
            InvKind::Block => {
                let block = self
                    .chain
                    .get_block(&id)
                    .await
                    .ok_or_else(|| Rejection::NotFound { kind, id: id.clone() })?;
                let bytes = block
                    .to_bytes()
                    .map_err(|e| Rejection::Invalid(format!("cannot encode block {}: {}", id, e)))?;
                Message::Block(bytes)
            }
            InvKind::Tx => {
                let tx = self.mempool.read().await.get(&id).cloned();
                Message::Tx(tx.ok_or(Rejection::NotFound { kind, id })?)
            }
        };

        self.send(remote, message).await;
        Ok(Outcome::Replied)
    }

    pub(crate) async fn on_block(&self, remote: &str, bytes: Vec<u8>) -> HandleResult {
        let block = Block::from_bytes(&bytes)
            .map_err(|e| Rejection::Invalid(format!("malformed block: {}", e)))?;
        let hash = block.hash.clone();

        let duplicate = if self.chain.get_block(&hash).await.is_some() {
            true
        } else {
            let tx_ids: Vec<String> = block.transactions.iter().map(|tx| tx.id.clone()).collect();
            match self.chain.append_block(block).await {
                Ok(()) => {
                    let cleared = self
                        .mempool
                        .write()
                        .await
                        .remove_all(tx_ids.iter().map(String::as_str));
                    if cleared > 0 {
                        log::debug!("Block {} confirmed {} pending transactions", hash, cleared);
                    }
                    false
                }
                Err(BlockchainError::DuplicateBlock(_)) => true,
                Err(e) => return Err(Rejection::Invalid(e.to_string())),
            }
        };

        let next = if duplicate {
            // A stored block only moves the queue when it is the one we asked for
            match self.fetch_queue.advance_past(&hash).await {
                Some(next) => next,
                None => {
                    log::debug!("Block {} from {} already stored", hash, remote);
                    return Ok(Outcome::Ignored);
                }
            }
        } else {
            self.fetch_queue.pop_next().await
        };
        let reindexed = match &next {
            Some(id) => {
                self.send(
                    remote,
                    Message::GetData {
                        kind: InvKind::Block,
                        id: id.clone(),
                    },
                )
                .await;
                false
            }
            None => {
                self.chain.rebuild_utxo_index().await;
                true
            }
        };

        Ok(Outcome::BlockProcessed {
            hash,
            appended: !duplicate,
            next,
            reindexed,
        })
    }
}
