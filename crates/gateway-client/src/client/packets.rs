//! Packet handling
//!
//! Event type first (READY / RESUMED), then the sequence, then the op code.
//! The READY heartbeat therefore still carries the sequence seen before READY.

use super::policy::ReconnectTrigger;
use super::GatewayClient;
use crate::bootstrap::with_gateway_query;
use crate::connection::{send_heartbeat, Beat, ConnectionState};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{GatewayMessage, OpCode};

impl GatewayClient {
    /// Apply one received packet to the session
    ///
    /// Returns the reconnect trigger the packet raised, if any. Unknown op
    /// codes and event types are logged and ignored.
    pub async fn handle_packet(
        &mut self,
        message: GatewayMessage,
    ) -> GatewayResult<Option<ReconnectTrigger>> {
        tracing::trace!(
            op = message.op,
            event = message.event_type(),
            seq = ?message.s,
            "Packet received"
        );

        match message.event_type() {
            "READY" => {
                if let Some(trigger) = self.on_ready(&message).await? {
                    return Ok(Some(trigger));
                }
            }
            "RESUMED" => self.on_resumed(),
            "" => {}
            other => tracing::trace!(event = other, "Application event"),
        }

        if let Some(seq) = message.s {
            self.session.observe_sequence(seq);
        }

        let trigger = match message.opcode() {
            Some(OpCode::Dispatch) => {
                self.dispatcher.forward(message).await;
                None
            }
            Some(OpCode::HeartbeatAck) => {
                self.session.acknowledge_heartbeat();
                tracing::trace!(latency = ?self.session.latency(), "Heartbeat acknowledged");
                None
            }
            Some(OpCode::Heartbeat) => {
                self.heartbeat_now("requested").await?;
                None
            }
            Some(OpCode::Reconnect) => {
                tracing::info!("Server requested reconnect");
                Some(ReconnectTrigger::ServerReconnect)
            }
            Some(OpCode::InvalidSession) => match message.as_invalid_session() {
                Ok(resumable) => {
                    if !resumable {
                        self.session.clear_identity();
                    }
                    tracing::warn!(resumable, "Session invalidated by server");
                    Some(ReconnectTrigger::InvalidSession { resumable })
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Undecodable Invalid Session payload");
                    Some(ReconnectTrigger::Decode)
                }
            },
            Some(op) => {
                tracing::debug!(op = %op, "Ignoring unexpected op code");
                None
            }
            None => {
                tracing::debug!(op = message.op, "Ignoring unknown op code");
                None
            }
        };

        Ok(trigger)
    }

    async fn on_ready(&mut self, message: &GatewayMessage) -> GatewayResult<Option<ReconnectTrigger>> {
        let ready = match message.as_ready() {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable READY payload");
                return Ok(Some(ReconnectTrigger::Decode));
            }
        };

        let resume_url = match with_gateway_query(&ready.resume_gateway_url, self.config.gateway_version) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Keeping resume URL as received");
                ready.resume_gateway_url.clone()
            }
        };

        tracing::info!(
            session_id = %ready.session_id,
            resume_url = %resume_url,
            shard = ?self.config.shard,
            "Session ready"
        );

        // READY counts as an acknowledgement so the first beat goes out
        self.session.establish(ready.session_id, resume_url);
        self.enter_active();
        self.heartbeat_now("ready").await?;

        Ok(None)
    }

    fn on_resumed(&mut self) {
        self.session.set_resuming(false);
        self.enter_active();
        tracing::info!(
            session_id = ?self.session.session_id(),
            seq = self.session.sequence(),
            "Session resumed"
        );
    }

    fn enter_active(&mut self) {
        self.session.set_state(ConnectionState::Active);
        self.backoff.reset();
        self.resume_attempts = 0;
        self.established = true;

        if let (Some(connection), Some(interval)) =
            (self.connection.as_mut(), self.session.heartbeat_interval())
        {
            connection.start_heartbeat(interval, self.session.clone());
        }
    }

    /// Heartbeat outside the schedule, through the same ack check as the ticks
    async fn heartbeat_now(&self, reason: &'static str) -> GatewayResult<()> {
        let connection = self.connection.as_ref().ok_or(GatewayError::NotConnected)?;

        match send_heartbeat(&self.session, connection.outbound()).await? {
            Beat::Sent(sequence) => tracing::debug!(sequence, reason, "Heartbeat sent"),
            Beat::Unacknowledged => {
                tracing::debug!(reason, "Previous heartbeat unacknowledged; skipping");
            }
        }
        Ok(())
    }
}
