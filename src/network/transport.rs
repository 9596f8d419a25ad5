//! Outbound message delivery
//!
//! Handlers only ever see [`Transport::send`], which queues and returns.

use crate::network::message::{Envelope, Message};
use crate::network::peer::PeerError;
use crate::network::server::{connect_to_peer, EnvelopeCodec};
use async_trait::async_trait;
use futures::sink::SinkExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::FramedWrite;

/// Queued envelopes per destination before new sends are dropped
const LINK_BUFFER: usize = 256;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue `message` for `to`. Delivery failures are logged, never returned.
    async fn send(&self, to: &str, message: Message);
}

/// One lazily connected TCP link per destination, each drained by its own
/// writer task. A link whose task died is replaced on the next send.
pub struct TcpTransport {
    local_addr: String,
    links: Mutex<HashMap<String, mpsc::Sender<Envelope>>>,
}

impl TcpTransport {
    pub fn new(local_addr: impl Into<String>) -> Self {
        Self {
            local_addr: local_addr.into(),
            links: Mutex::new(HashMap::new()),
        }
    }

    fn open_link(to: &str) -> mpsc::Sender<Envelope> {
        let (tx, rx) = mpsc::channel(LINK_BUFFER);
        let addr = to.to_string();
        tokio::spawn(async move {
            if let Err(e) = run_link(&addr, rx).await {
                log::warn!("Link to {} closed: {}", addr, e);
            }
        });
        tx
    }
}

async fn run_link(addr: &str, mut rx: mpsc::Receiver<Envelope>) -> Result<(), PeerError> {
    let (stream, _) = connect_to_peer(addr).await?;
    let mut writer = FramedWrite::new(stream, EnvelopeCodec);

    while let Some(envelope) = rx.recv().await {
        writer.send(envelope).await?;
    }
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, to: &str, message: Message) {
        let kind = message.type_name();
        let envelope = Envelope::new(self.local_addr.clone(), message);
        let mut links = self.links.lock().await;

        let link = match links.get(to) {
            Some(link) if !link.is_closed() => link.clone(),
            _ => {
                let link = Self::open_link(to);
                links.insert(to.to_string(), link.clone());
                link
            }
        };

        if let Err(e) = link.try_send(envelope) {
            log::warn!("Dropping {} to {}: {}", kind, to, e);
        }
    }
}

/// Shared queue of `(destination, envelope)` pairs
pub type Outbox = Arc<Mutex<VecDeque<(String, Envelope)>>>;

/// Transport that appends to an in-memory [`Outbox`] instead of a socket.
/// Several nodes can share one outbox to simulate a network in-process.
#[derive(Clone)]
pub struct MemoryTransport {
    local_addr: String,
    outbox: Outbox,
}

impl MemoryTransport {
    pub fn new(local_addr: impl Into<String>) -> Self {
        Self::with_outbox(local_addr, Outbox::default())
    }

    pub fn with_outbox(local_addr: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            local_addr: local_addr.into(),
            outbox,
        }
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Remove and return everything queued so far
    pub async fn drain(&self) -> Vec<(String, Envelope)> {
        self.outbox.lock().await.drain(..).collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, to: &str, message: Message) {
        self.outbox
            .lock()
            .await
            .push_back((to.to_string(), Envelope::new(self.local_addr.clone(), message)));
    }
}
