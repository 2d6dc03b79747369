//! In-process transport
//!
//! Every dial hands a [`MemoryPeer`] to the paired [`MemoryServer`], which
//! plays the gateway side in tests or embedded setups.

use super::{BoxFrameSink, BoxFrameStream, CloseFrame, Frame, FrameSink, FrameStream, Transport};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Client side of the in-process transport
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    incoming: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
}

/// Accepts connections dialed through the paired [`MemoryTransport`]
#[derive(Debug)]
pub struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// Create a connected transport/server pair
    #[must_use]
    pub fn pair() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refusals = Arc::new(AtomicUsize::new(0));
        (
            Self {
                incoming: tx,
                refusals: refusals.clone(),
            },
            MemoryServer {
                incoming: rx,
                refusals,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, url: &str) -> TransportResult<(BoxFrameSink, BoxFrameStream)> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Dial {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            to_client,
            from_client,
        };
        self.incoming.send(peer).map_err(|_| TransportError::Dial {
            url: url.to_string(),
            reason: "server is gone".to_string(),
        })?;

        Ok((
            Box::new(MemorySink { tx: Some(client_tx) }),
            Box::new(MemoryStream { rx: client_rx }),
        ))
    }
}

impl MemoryServer {
    /// Wait for the next dialed connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// Make the next `n` dials fail
    pub fn refuse_next(&self, n: usize) {
        self.refusals.store(n, Ordering::SeqCst);
    }
}

/// Gateway side of one in-process connection
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    to_client: mpsc::UnboundedSender<TransportResult<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// URL the client dialed
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a text frame to the client; false if the client is gone
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(Frame::Text(text.into()))).is_ok()
    }

    /// Push a JSON envelope to the client
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Push a close frame to the client
    pub fn send_close(&self, code: u16) -> bool {
        self.to_client
            .send(Ok(Frame::Close(Some(CloseFrame::new(code, "")))))
            .is_ok()
    }

    /// Make the client's next receive fail
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.to_client
            .send(Err(TransportError::Receive(reason.into())))
            .is_ok()
    }

    /// Next frame sent by the client; `None` once the client dropped the connection
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next frame parsed as JSON; `None` on a close frame or disconnect
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        match self.recv().await? {
            Frame::Text(text) => serde_json::from_str(&text).ok(),
            Frame::Close(_) => None,
        }
    }

    /// Frame already sent by the client, without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Whether the client has dropped its read half
    pub fn is_client_gone(&self) -> bool {
        self.to_client.is_closed()
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Frame>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> TransportResult<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame)
            .map_err(|_| TransportError::Send("peer disconnected".to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<TransportResult<Frame>>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Option<TransportResult<Frame>> {
        self.rx.recv().await
    }
}
