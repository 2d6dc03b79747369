//! One physical gateway connection
//!
//! Owns the writer task, the reader task and the heartbeat supervisor of a
//! single dial. Every connection gets its own event queue, so nothing read
//! from a torn-down connection can reach the coordinator afterwards.

use super::heartbeat::HeartbeatSupervisor;
use super::Session;
use crate::client::{classify_close, CloseOutcome, ReconnectTrigger};
use crate::error::{GatewayError, GatewayResult, ProtocolError, TransportError};
use crate::protocol::{GatewayMessage, HelloPayload, OpCode};
use crate::transport::{BoxFrameSink, BoxFrameStream, CloseFrame, Frame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Something the coordinator must react to
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Decoded envelope
    Message(GatewayMessage),
    /// Frame that was not a valid envelope
    DecodeFailed(ProtocolError),
    /// Peer closed the connection, with its close frame if any
    Closed(Option<CloseFrame>),
    /// Reading or writing failed
    TransportFailed(TransportError),
    /// Heartbeat went unacknowledged for a full interval
    Zombie,
}

/// Handle to a live connection
pub struct Connection {
    id: u64,
    url: String,
    outbound: mpsc::Sender<Frame>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events: mpsc::Receiver<ConnectionEvent>,
    stream: Option<BoxFrameStream>,
    cancel: CancellationToken,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<HeartbeatSupervisor>,
}

impl Connection {
    /// Wrap a freshly dialed connection and start its writer
    ///
    /// The read half is kept back until [`Self::read_hello`] consumed the
    /// first frame and [`Self::start_reader`] is called.
    pub fn open(
        id: u64,
        url: impl Into<String>,
        sink: BoxFrameSink,
        stream: BoxFrameStream,
        queue_capacity: usize,
        parent: &CancellationToken,
    ) -> Self {
        let capacity = queue_capacity.max(1);
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (events_tx, events) = mpsc::channel(capacity);
        let cancel = parent.child_token();

        let writer = tokio::spawn(write_loop(
            id,
            sink,
            outbound_rx,
            events_tx.clone(),
            cancel.clone(),
        ));

        Self {
            id,
            url: url.into(),
            outbound,
            events_tx,
            events,
            stream: Some(stream),
            cancel,
            writer: Some(writer),
            reader: None,
            heartbeat: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the first frame and require it to be a usable Hello
    pub async fn read_hello(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> GatewayResult<HelloPayload> {
        let stream = self.stream.as_mut().ok_or(GatewayError::NotConnected)?;

        let first = tokio::select! {
            () = cancel.cancelled() => return Err(GatewayError::Cancelled),
            first = tokio::time::timeout(timeout, stream.recv()) => {
                first.map_err(|_| GatewayError::HelloTimeout(timeout))?
            }
        };

        let text = match first {
            None => return Err(TransportError::Closed.into()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Frame::Close(frame))) => return Err(close_error(frame.as_ref())),
            Some(Ok(Frame::Text(text))) => text,
        };

        let message = GatewayMessage::from_json(&text)
            .map_err(|e| GatewayError::Handshake(format!("malformed first frame: {e}")))?;

        if message.opcode() != Some(OpCode::Hello) {
            return Err(GatewayError::Handshake(format!(
                "expected Hello (op 10) as first frame, got op {}",
                message.op
            )));
        }

        let hello = message
            .as_hello()
            .map_err(|e| GatewayError::Handshake(e.to_string()))?;

        if hello.heartbeat_interval == 0 {
            return Err(GatewayError::Handshake(
                "Hello carried a zero heartbeat interval".to_string(),
            ));
        }

        Ok(hello)
    }

    /// Hand the read half to a background reader
    pub fn start_reader(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.reader = Some(tokio::spawn(read_loop(
                self.id,
                stream,
                self.events_tx.clone(),
                self.cancel.clone(),
            )));
        }
    }

    /// Start (or restart) the heartbeat supervisor
    pub fn start_heartbeat(&mut self, interval: Duration, session: Arc<Session>) {
        // Dropping the previous supervisor cancels it
        self.heartbeat = Some(HeartbeatSupervisor::start(
            self.id,
            interval,
            session,
            self.outbound.clone(),
            self.events_tx.clone(),
            self.cancel.child_token(),
        ));
    }

    pub fn outbound(&self) -> &mpsc::Sender<Frame> {
        &self.outbound
    }

    /// Queue an envelope for the writer
    pub async fn send(&self, message: &GatewayMessage) -> GatewayResult<()> {
        let json = message.to_json().map_err(|source| ProtocolError::Encode {
            op: message.opcode().unwrap_or(OpCode::Dispatch),
            source,
        })?;

        self.outbound
            .send(Frame::Text(json))
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    /// Next event from this connection
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Send a close frame with `code`, then stop every task of this connection
    ///
    /// Waits at most `timeout` for the close frame to be flushed. Safe to
    /// call more than once.
    pub async fn close(&mut self, code: u16, timeout: Duration) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop().await;
        }

        let frame = Frame::Close(Some(CloseFrame::new(code, "")));
        let queued = matches!(
            tokio::time::timeout(timeout, self.outbound.send(frame)).await,
            Ok(Ok(()))
        );

        self.cancel.cancel();

        if let Some(mut writer) = self.writer.take() {
            let flushed = queued && tokio::time::timeout(timeout, &mut writer).await.is_ok();
            if !flushed {
                tracing::debug!(connection_id = self.id, "Close frame not flushed in time");
                writer.abort();
            }
        }

        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        self.stream = None;

        tracing::debug!(connection_id = self.id, code, "Connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("reading", &self.reader.is_some())
            .field("heartbeat", &self.heartbeat.is_some())
            .finish()
    }
}

/// Error for a close frame received before Hello, classified like any other close
fn close_error(frame: Option<&CloseFrame>) -> GatewayError {
    match classify_close(frame) {
        CloseOutcome::Fatal(code) => GatewayError::Rejected(code),
        CloseOutcome::Reconnect(ReconnectTrigger::SessionInvalidated(code)) => {
            GatewayError::SessionInvalidated(code)
        }
        CloseOutcome::Reconnect(_) => TransportError::Closed.into(),
    }
}

async fn write_loop(
    connection_id: u64,
    mut sink: BoxFrameSink,
    mut outbound: mpsc::Receiver<Frame>,
    events: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
) {
    // Not cancellable itself: a queued close frame must still go out
    while let Some(frame) = outbound.recv().await {
        let closing = matches!(frame, Frame::Close(_));

        if let Err(e) = sink.send(frame).await {
            if !closing {
                tracing::warn!(connection_id, error = %e, "Failed to write frame");
                tokio::select! {
                    () = cancel.cancelled() => {}
                    _ = events.send(ConnectionEvent::TransportFailed(e)) => {}
                }
            }
            break;
        }

        if closing {
            break;
        }
    }

    let _ = sink.close().await;
}

async fn read_loop(
    connection_id: u64,
    mut stream: BoxFrameStream,
    events: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.recv() => next,
        };

        let (event, last) = match next {
            None => (ConnectionEvent::Closed(None), true),
            Some(Err(e)) => (ConnectionEvent::TransportFailed(e), true),
            Some(Ok(Frame::Close(frame))) => (ConnectionEvent::Closed(frame), true),
            Some(Ok(Frame::Text(text))) => match GatewayMessage::from_json(&text) {
                Ok(message) => (ConnectionEvent::Message(message), false),
                Err(e) => (ConnectionEvent::DecodeFailed(e), false),
            },
        };

        // Wait for room in the queue, never past cancellation
        let delivered = tokio::select! {
            () = cancel.cancelled() => false,
            sent = events.send(event) => sent.is_ok(),
        };

        if !delivered || last {
            break;
        }
    }

    tracing::trace!(connection_id, "Reader stopped");
}
