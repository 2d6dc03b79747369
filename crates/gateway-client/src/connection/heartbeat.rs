//! Heartbeat supervisor
//!
//! One periodic task per active connection. Periodic and server-requested
//! heartbeats share [`send_heartbeat`], so the "previous beat acknowledged"
//! check is applied the same way to both.

use super::{ConnectionEvent, Session};
use crate::error::{GatewayResult, ProtocolError, TransportError};
use crate::protocol::{GatewayMessage, OpCode};
use crate::transport::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Outcome of one heartbeat attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Heartbeat queued with this sequence
    Sent(i64),
    /// Previous heartbeat never acknowledged; nothing sent
    Unacknowledged,
}

/// Queue a heartbeat carrying the current sequence, unless one is still pending
pub(crate) async fn send_heartbeat(
    session: &Session,
    outbound: &mpsc::Sender<Frame>,
) -> GatewayResult<Beat> {
    let Some(sequence) = session.claim_heartbeat() else {
        return Ok(Beat::Unacknowledged);
    };

    let json = GatewayMessage::heartbeat(sequence)?
        .to_json()
        .map_err(|source| ProtocolError::Encode {
            op: OpCode::Heartbeat,
            source,
        })?;

    outbound
        .send(Frame::Text(json))
        .await
        .map_err(|_| TransportError::Closed)?;

    Ok(Beat::Sent(sequence))
}

/// Periodic heartbeat task bound to one connection
#[derive(Debug)]
pub(crate) struct HeartbeatSupervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatSupervisor {
    /// Start beating every `interval`, first tick one full interval from now
    pub fn start(
        connection_id: u64,
        interval: Duration,
        session: Arc<Session>,
        outbound: mpsc::Sender<Frame>,
        events: mpsc::Sender<ConnectionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(run(connection_id, interval, session, outbound, events, cancel.clone()));

        tracing::debug!(
            connection_id,
            interval_ms = interval.as_millis(),
            "Heartbeat supervisor started"
        );

        Self { cancel, handle }
    }

    /// Cancel the task and wait for it to finish
    pub async fn stop(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for HeartbeatSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    connection_id: u64,
    interval: Duration,
    session: Arc<Session>,
    outbound: mpsc::Sender<Frame>,
    events: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match send_heartbeat(&session, &outbound).await {
            Ok(Beat::Sent(sequence)) => {
                tracing::trace!(connection_id, sequence, "Heartbeat sent");
            }
            Ok(Beat::Unacknowledged) => {
                tracing::warn!(
                    connection_id,
                    interval_ms = interval.as_millis(),
                    "Heartbeat not acknowledged; connection is a zombie"
                );
                tokio::select! {
                    () = cancel.cancelled() => {}
                    _ = events.send(ConnectionEvent::Zombie) => {}
                }
                break;
            }
            Err(e) => {
                // The writer reports its own failure
                tracing::debug!(connection_id, error = %e, "Heartbeat not sent; stopping");
                break;
            }
        }
    }

    tracing::debug!(connection_id, "Heartbeat supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(frame: Frame) -> serde_json::Value {
        match frame {
            Frame::Text(text) => serde_json::from_str(&text).unwrap(),
            Frame::Close(_) => panic!("unexpected close frame"),
        }
    }

    #[tokio::test]
    async fn test_send_heartbeat_claims_once() {
        let session = Session::new("wss://gateway.test");
        let (tx, mut rx) = mpsc::channel(4);

        assert_eq!(send_heartbeat(&session, &tx).await.unwrap(), Beat::Sent(-1));
        assert_eq!(parse(rx.recv().await.unwrap()), serde_json::json!({"op": 1, "d": -1}));

        assert_eq!(send_heartbeat(&session, &tx).await.unwrap(), Beat::Unacknowledged);
        assert!(rx.try_recv().is_err());

        session.acknowledge_heartbeat();
        session.observe_sequence(12);
        assert_eq!(send_heartbeat(&session, &tx).await.unwrap(), Beat::Sent(12));
    }

    #[tokio::test]
    async fn test_send_heartbeat_on_closed_channel() {
        let session = Session::new("wss://gateway.test");
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        assert!(send_heartbeat(&session, &tx).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_full_interval() {
        let session = Arc::new(Session::new("wss://gateway.test"));
        let (tx, mut rx) = mpsc::channel(4);
        let (events_tx, _events_rx) = mpsc::channel(4);
        let start = Instant::now();

        let supervisor = HeartbeatSupervisor::start(
            1,
            Duration::from_millis(500),
            session.clone(),
            tx,
            events_tx,
            CancellationToken::new(),
        );

        rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));

        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_tick_reports_zombie() {
        let session = Arc::new(Session::new("wss://gateway.test"));
        let (tx, mut rx) = mpsc::channel(4);
        let (events_tx, mut events_rx) = mpsc::channel(4);

        let _supervisor = HeartbeatSupervisor::start(
            1,
            Duration::from_millis(100),
            session.clone(),
            tx,
            events_tx,
            CancellationToken::new(),
        );

        // First tick sends, nobody acknowledges, second tick gives up
        rx.recv().await.unwrap();
        assert!(matches!(events_rx.recv().await, Some(ConnectionEvent::Zombie)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_beats() {
        let session = Arc::new(Session::new("wss://gateway.test"));
        let (tx, mut rx) = mpsc::channel(4);
        let (events_tx, _events_rx) = mpsc::channel(4);

        let supervisor = HeartbeatSupervisor::start(
            1,
            Duration::from_millis(100),
            session,
            tx,
            events_tx,
            CancellationToken::new(),
        );
        supervisor.stop().await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Sender was dropped with the task
        assert!(rx.recv().await.is_none());
    }
}
