//! Event sinks

use super::DispatchEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Receives every dispatch event, in arrival order
///
/// Called on the coordinator's task: a slow sink delays the processing of
/// later packets.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_dispatch(&self, event: DispatchEvent);
}

#[async_trait]
impl<F> EventSink for F
where
    F: Fn(DispatchEvent) + Send + Sync,
{
    async fn on_dispatch(&self, event: DispatchEvent) {
        self(event);
    }
}

/// Forwards events into a bounded channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<DispatchEvent>,
    receiver_gone: AtomicBool,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DispatchEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                receiver_gone: AtomicBool::new(false),
            },
            rx,
        )
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn on_dispatch(&self, event: DispatchEvent) {
        if self.tx.send(event).await.is_err() && !self.receiver_gone.swap(true, Ordering::Relaxed) {
            tracing::warn!("Event receiver dropped; discarding further events");
        }
    }
}

/// Logs each event and drops it
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn on_dispatch(&self, event: DispatchEvent) {
        tracing::info!(
            event = %event.name,
            sequence = ?event.sequence,
            size = event.data.as_ref().map_or(0, |d| d.get().len()),
            "Dispatch received"
        );
    }
}
