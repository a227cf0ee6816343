//! Relay seam: delivery of envelopes between identities.
//!
//! The relay owns ordering and delivery guarantees; this side sends
//! best-effort and hands inbound frames to the router one at a time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::call::Envelope;

#[async_trait]
pub trait Relay: Send {
    /// Best-effort send; delivery is the relay's concern.
    async fn send(&mut self, envelope: Envelope) -> Result<()>;

    /// Next raw inbound frame, `None` once the relay is gone.
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket relay client; envelopes travel as JSON text frames.
pub struct WsRelay {
    stream: WsStream,
}

impl WsRelay {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url)
            .await
            .with_context(|| format!("connecting to relay {url}"))?;
        debug!(url, "relay connected");
        Ok(Self { stream })
    }
}

#[async_trait]
impl Relay for WsRelay {
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        let json = serde_json::to_string(&envelope)?;
        self.stream.send(WsMessage::Text(json)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(text.into_bytes()),
                Ok(WsMessage::Binary(data)) => return Some(data),
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    warn!("relay stream error: {e}");
                    return None;
                }
            }
        }
    }
}

/// Cross-wired in-process relay pair, for tests and same-process loopback.
pub struct MemoryRelay {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl MemoryRelay {
    /// Create two relays where each side's sends arrive at the other side.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self { tx: tx_a, rx: rx_b }, Self { tx: tx_b, rx: rx_a })
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| anyhow::anyhow!("peer relay dropped"))
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        let envelope = self.rx.recv().await?;
        envelope.to_bytes().ok()
    }
}
