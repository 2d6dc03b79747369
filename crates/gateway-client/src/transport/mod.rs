//! Transport capability
//!
//! The session state machine only sees discrete frames; dialing, framing and
//! TLS belong to an implementation of [`Transport`].

mod memory;
mod websocket;

pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use websocket::TungsteniteTransport;

use crate::error::TransportResult;
use async_trait::async_trait;

/// A discrete message exchanged with the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON envelope
    Text(String),
    /// Close control frame
    Close(Option<CloseFrame>),
}

/// Close code and reason of a close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Opens connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dial `url`, returning the write and read halves of the new connection
    async fn dial(&self, url: &str) -> TransportResult<(BoxFrameSink, BoxFrameStream)>;
}

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame
    async fn send(&mut self, frame: Frame) -> TransportResult<()>;

    /// Close the underlying connection
    async fn close(&mut self) -> TransportResult<()>;
}

/// Read half of a connection
#[async_trait]
pub trait FrameStream: Send + Sync {
    /// Next frame; `None` once the connection is gone
    async fn recv(&mut self) -> Option<TransportResult<Frame>>;
}

pub type BoxFrameSink = Box<dyn FrameSink>;
pub type BoxFrameStream = Box<dyn FrameStream>;
