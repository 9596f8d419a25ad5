//! Version/verack handshake and peer liveness

use crate::network::message::{Message, VersionMessage};
use crate::network::node::{HandleResult, Node, Outcome, Rejection};
use crate::network::peer::{HandshakeError, VersionReply};

impl Node {
    /// Open a handshake with `remote` by sending our `version`.
    ///
    /// Addresses that are already connecting or active are skipped.
    pub async fn initiate_handshake(&self, remote: &str) -> HandleResult {
        match self
            .peers
            .begin_outbound(remote, self.config.max_connect_peer)
            .await
        {
            Ok(()) => {}
            Err(HandshakeError::AlreadyConnecting(_)) | Err(HandshakeError::AlreadyActive(_)) => {
                return Ok(Outcome::Ignored)
            }
            Err(e) => return Err(e.into()),
        }

        let height = self.chain.best_height().await;
        self.send(remote, Message::Version(VersionMessage::new(height)))
            .await;
        Ok(Outcome::HandshakeStarted)
    }

    pub(crate) async fn on_version(&self, remote: &str, version: VersionMessage) -> HandleResult {
        let reply = self
            .peers
            .accept_version(remote, version.best_height, self.config.max_connect_peer)
            .await?;

        if reply == VersionReply::VersionAndVerAck {
            let height = self.chain.best_height().await;
            self.send(remote, Message::Version(VersionMessage::new(height)))
                .await;
        }
        self.send(remote, Message::VerAck).await;
        Ok(Outcome::Replied)
    }

    pub(crate) async fn on_verack(&self, remote: &str) -> HandleResult {
        let remote_height = self.peers.accept_verack(remote).await?;
        let local_height = self.chain.best_height().await;
        log::info!(
            "Peer {} active (height {}, ours {})",
            remote,
            remote_height,
            local_height
        );

        let syncing = local_height < remote_height;
        if syncing {
            self.send(remote, Message::GetBlocks).await;
        }
        Ok(Outcome::PeerActivated { syncing })
    }

    pub(crate) async fn on_ping(&self, remote: &str) -> HandleResult {
        self.peers.touch(remote).await;
        self.send(remote, Message::Pong).await;
        Ok(Outcome::Replied)
    }

    pub(crate) async fn on_pong(&self, remote: &str) -> HandleResult {
        if self.peers.touch(remote).await {
            Ok(Outcome::Ignored)
        } else {
            Err(Rejection::ProtocolViolation(format!(
                "pong from inactive peer {}",
                remote
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Blockchain;
    use crate::network::message::{Message, VersionMessage};
    use crate::network::node::tests::{relay_config, sent_messages, test_node};
    use crate::network::node::{Outcome, Rejection};
    use crate::network::peer::HandshakeState;
    use std::sync::Arc;

    const REMOTE: &str = "10.0.0.5:3000";

    fn taller_chain(blocks: usize) -> Blockchain {
        let mut chain = Blockchain::with_difficulty(4);
        for _ in 0..blocks {
            chain.mine_block(vec![], "miner").unwrap();
        }
        chain
    }

    #[tokio::test]
    async fn test_passive_side_replies_version_then_verack() {
        let (node, _, transport) = test_node(relay_config("10.0.0.9:3000"), taller_chain(2));

        let result = node
            .handle(REMOTE, Message::Version(VersionMessage::new(1)))
            .await;
        assert_eq!(result, Ok(Outcome::Replied));

        let sent = transport.drain().await;
        assert_eq!(
            sent_messages(&sent),
            vec![
                (REMOTE, &Message::Version(VersionMessage::new(2))),
                (REMOTE, &Message::VerAck)
            ]
        );
        let conn = node.peers().connection(REMOTE).await.unwrap();
        assert_eq!(conn.state, HandshakeState::AwaitingVerAck);
    }

    #[tokio::test]
    async fn test_active_side_requests_blocks_from_taller_peer() {
        let (node, _, transport) =
            test_node(relay_config("10.0.0.9:3000"), Blockchain::with_difficulty(4));

        assert_eq!(
            node.initiate_handshake(REMOTE).await,
            Ok(Outcome::HandshakeStarted)
        );
        node.handle(REMOTE, Message::Version(VersionMessage::new(3)))
            .await
            .unwrap();
        let result = node.handle(REMOTE, Message::VerAck).await;
        assert_eq!(result, Ok(Outcome::PeerActivated { syncing: true }));

        let sent = transport.drain().await;
        assert_eq!(
            sent_messages(&sent),
            vec![
                (REMOTE, &Message::Version(VersionMessage::new(0))),
                (REMOTE, &Message::VerAck),
                (REMOTE, &Message::GetBlocks)
            ]
        );
        assert!(node.peers().is_active(REMOTE).await);
    }

    #[tokio::test]
    async fn test_initiate_skips_known_peer() {
        let (node, _, transport) =
            test_node(relay_config("10.0.0.9:3000"), Blockchain::with_difficulty(4));
        node.initiate_handshake(REMOTE).await.unwrap();
        transport.drain().await;

        assert_eq!(node.initiate_handshake(REMOTE).await, Ok(Outcome::Ignored));
        assert!(transport.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_reached_sends_nothing() {
        let mut config = relay_config("10.0.0.9:3000");
        config.max_connect_peer = 1;
        let (node, _, transport) = test_node(config, Blockchain::with_difficulty(4));

        node.handle("10.0.0.6:3000", Message::Version(VersionMessage::new(0)))
            .await
            .unwrap();
        transport.drain().await;

        let result = node
            .handle(REMOTE, Message::Version(VersionMessage::new(0)))
            .await;
        assert_eq!(result, Err(Rejection::AtCapacity(1)));
        assert!(transport.drain().await.is_empty());
        assert!(node.peers().connection(REMOTE).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_versions_respect_capacity() {
        let mut config = relay_config("10.0.0.9:3000");
        config.max_connect_peer = 3;
        let (node, _, transport) = test_node(config, Blockchain::with_difficulty(4));
        let node = Arc::new(node);

        let mut handles = Vec::new();
        for i in 0..12 {
            let node = node.clone();
            handles.push(tokio::spawn(async move {
                node.handle(
                    &format!("10.0.2.{}:3000", i),
                    Message::Version(VersionMessage::new(0)),
                )
                .await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(Outcome::Replied) => accepted += 1,
                other => assert_eq!(other, Err(Rejection::AtCapacity(3))),
            }
        }

        assert_eq!(accepted, 3);
        assert_eq!(node.peers().connecting_count().await, 3);
        // version + verack per accepted peer
        assert_eq!(transport.drain().await.len(), 6);
    }

    #[tokio::test]
    async fn test_verack_out_of_sequence() {
        let (node, _, transport) =
            test_node(relay_config("10.0.0.9:3000"), Blockchain::with_difficulty(4));

        let result = node.handle(REMOTE, Message::VerAck).await;
        assert!(matches!(result, Err(Rejection::ProtocolViolation(_))));
        assert!(transport.drain().await.is_empty());
        assert!(!node.peers().is_active(REMOTE).await);
    }

    #[tokio::test]
    async fn test_ping_pong_refresh_liveness() {
        let (node, _, transport) =
            test_node(relay_config("10.0.0.9:3000"), Blockchain::with_difficulty(4));

        assert_eq!(node.handle(REMOTE, Message::Ping).await, Ok(Outcome::Replied));
        assert_eq!(
            sent_messages(&transport.drain().await),
            vec![(REMOTE, &Message::Pong)]
        );
        assert!(node.handle(REMOTE, Message::Pong).await.is_err());

        node.handle(REMOTE, Message::Version(VersionMessage::new(0)))
            .await
            .unwrap();
        node.handle(REMOTE, Message::VerAck).await.unwrap();
        let seen = node.peers().last_seen(REMOTE).await.unwrap();

        assert_eq!(node.handle(REMOTE, Message::Pong).await, Ok(Outcome::Ignored));
        assert!(node.peers().last_seen(REMOTE).await.unwrap() >= seen);
    }
}
