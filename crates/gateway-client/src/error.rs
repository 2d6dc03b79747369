//! Gateway client error types

use crate::protocol::{CloseCode, OpCode};
use std::time::Duration;
use thiserror::Error;

/// Wire envelope or payload could not be encoded/decoded
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed frame or payload body
    #[error("Could not decode payload: {source} (body: {body})")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    /// Message arrived without the `d` field its op requires
    #[error("Missing payload for op {op} (t={event:?})")]
    MissingPayload { op: i64, event: Option<String> },

    /// Outgoing payload could not be serialized
    #[error("Could not encode {op} payload: {source}")]
    Encode {
        op: OpCode,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of the underlying frame connection
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Could not connect to {url}: {reason}")]
    Dial { url: String, reason: String },

    #[error("Could not send frame: {0}")]
    Send(String),

    #[error("Could not receive frame: {0}")]
    Receive(String),

    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),

    #[error("Connection closed")]
    Closed,
}

/// Failures of the bootstrap gateway URL lookup
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Credential rejected by the API
    #[error("Credential rejected (status {status})")]
    Unauthorized { status: u16 },

    #[error("Gateway lookup failed with status {status}")]
    Status { status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid gateway URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Top-level gateway client error
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// First frame was not a well-formed Hello
    #[error("Invalid handshake: {0}")]
    Handshake(String),

    #[error("Timed out waiting for Hello after {0:?}")]
    HelloTimeout(Duration),

    /// Server closed with a code that forbids reconnecting
    #[error("Gateway rejected the session: {0}")]
    Rejected(CloseCode),

    /// Server closed with a code that discards the session; a fresh Identify is needed
    #[error("Gateway invalidated the session: {0}")]
    SessionInvalidated(CloseCode),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection is not open")]
    NotConnected,

    #[error("No resumable session cached")]
    NoResumableSession,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Client has been shut down")]
    Closed,
}

impl GatewayError {
    /// Errors that end `run()` instead of going through the reconnect policy
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Bootstrap(_) | Self::Handshake(_) | Self::Rejected(_) | Self::Closed
        )
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Transport result type
pub type TransportResult<T> = Result<T, TransportError>;
