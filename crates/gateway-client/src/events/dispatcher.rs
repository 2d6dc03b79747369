//! Dispatch forwarding

use super::EventSink;
use crate::error::ProtocolError;
use crate::protocol::GatewayMessage;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One application event as delivered to a sink
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    /// Event type, e.g. `MESSAGE_CREATE`
    pub name: String,
    pub sequence: Option<i64>,
    /// Undecoded event data
    pub data: Option<Box<RawValue>>,
}

impl DispatchEvent {
    /// Decode the event data; a missing body decodes as JSON `null`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let body = self.data.as_ref().map_or("null", |d| d.get());
        serde_json::from_str(body).map_err(|source| ProtocolError::Decode {
            source,
            body: body.to_string(),
        })
    }
}

impl From<GatewayMessage> for DispatchEvent {
    fn from(message: GatewayMessage) -> Self {
        Self {
            name: message.t.unwrap_or_default(),
            sequence: message.s,
            data: message.d,
        }
    }
}

/// Hands dispatch messages to the configured sink
#[derive(Clone)]
pub struct EventDispatcher {
    sink: Arc<dyn EventSink>,
    delivered: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Forward one dispatch message
    pub async fn forward(&self, message: GatewayMessage) {
        let event = DispatchEvent::from(message);
        tracing::trace!(event = %event.name, sequence = ?event.sequence, "Forwarding dispatch");
        self.sink.on_dispatch(event).await;
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of events handed to the sink so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("delivered", &self.delivered())
            .finish_non_exhaustive()
    }
}
