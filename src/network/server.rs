//! TCP server and connection handling
//!
//! Accepts incoming peer connections and feeds their envelopes to the node.

use crate::network::message::{Envelope, MAGIC, MAX_MESSAGE_SIZE};
use crate::network::node::Node;
use crate::network::peer::PeerError;
use bytes::{Buf, BufMut, BytesMut};
use futures::stream::StreamExt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Decoder, Encoder, FramedRead};

const HEADER_LEN: usize = 8;

/// Length-prefixed framing: magic (4) + body length (4) + JSON body
pub struct EnvelopeCodec;

fn invalid_data(msg: impl ToString) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item.to_bytes().map_err(invalid_data)?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(invalid_data(format!(
                "{} message of {} bytes exceeds limit",
                item.message.type_name(),
                data.len()
            )));
        }

        dst.reserve(HEADER_LEN + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        if src[..4] != MAGIC {
            return Err(invalid_data("Invalid magic bytes"));
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(invalid_data(format!("Frame of {} bytes exceeds limit", len)));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let data = src.split_to(len);

        Envelope::from_bytes(&data).map(Some).map_err(invalid_data)
    }
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub async fn bind(addr: &str) -> Result<Self, io::Error> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Server listening on {}", addr);

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.listener.local_addr()
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), io::Error> {
        self.listener.accept().await
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: &str) -> Result<(TcpStream, SocketAddr), PeerError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PeerError::ConnectionFailed(format!("{}: {}", addr, e)))?;

    let peer_addr = stream
        .peer_addr()
        .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

    Ok((stream, peer_addr))
}

/// Read envelopes from an inbound connection in arrival order and hand each
/// to the node. Replies travel over the node's own outbound links.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    node: Arc<Node>,
) -> Result<(), PeerError> {
    let mut reader = FramedRead::new(stream, EnvelopeCodec);

    while let Some(frame) = reader.next().await {
        let envelope = frame.map_err(|e| {
            log::warn!("Error reading from {}: {}", addr, e);
            PeerError::IoError(e)
        })?;
        // Rejections are logged by the dispatcher and never reach the peer
        let _ = node.handle(&envelope.from, envelope.message).await;
    }

    log::debug!("Peer {} disconnected", addr);
    Ok(())
}
