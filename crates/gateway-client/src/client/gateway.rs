//! Gateway client coordinator

use super::policy::{classify_close, decide, Backoff, CloseOutcome, ReconnectAction, ReconnectTrigger};
use super::ClientConfig;
use crate::bootstrap::GatewayLocator;
use crate::connection::{Connection, ConnectionEvent, ConnectionState, Session};
use crate::error::{GatewayError, GatewayResult, TransportError};
use crate::events::{EventDispatcher, EventSink};
use crate::protocol::{CloseCode, GatewayMessage, HelloPayload, IdentifyPayload, ResumePayload};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Client side of one gateway session (one shard)
///
/// Owns the current connection and replaces it in place on reconnect, so the
/// handle callers hold stays the same for the whole session.
pub struct GatewayClient {
    pub(super) config: ClientConfig,
    transport: Arc<dyn Transport>,
    pub(super) dispatcher: EventDispatcher,
    pub(super) session: Arc<Session>,
    pub(super) connection: Option<Connection>,
    connections_opened: u64,
    pub(super) backoff: Backoff,
    pub(super) resume_attempts: u32,
    /// Reached Active at least once
    pub(super) established: bool,
}

impl GatewayClient {
    pub fn new<T, S>(config: ClientConfig, gateway_url: impl Into<String>, transport: T, sink: S) -> Self
    where
        T: Transport + 'static,
        S: EventSink + 'static,
    {
        Self::with_shared(config, gateway_url, Arc::new(transport), Arc::new(sink))
    }

    pub fn with_shared(
        config: ClientConfig,
        gateway_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let backoff = Backoff::new(&config.reconnect);
        Self {
            config,
            transport,
            dispatcher: EventDispatcher::new(sink),
            session: Arc::new(Session::new(gateway_url)),
            connection: None,
            connections_opened: 0,
            backoff,
            resume_attempts: 0,
            established: false,
        }
    }

    /// Resolve the gateway URL, then build the client
    ///
    /// A failed lookup is fatal.
    pub async fn bootstrap(
        locator: &dyn GatewayLocator,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> GatewayResult<Self> {
        let url = locator.locate().await?;
        Ok(Self::with_shared(config, url, transport, sink))
    }

    // === Observation ===

    /// Shared session state, observable while `run()` owns the client
    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.session_id()
    }

    pub fn resume_url(&self) -> Option<String> {
        self.session.resume_url()
    }

    pub fn sequence(&self) -> i64 {
        self.session.sequence()
    }

    pub fn is_heartbeat_acked(&self) -> bool {
        self.session.is_heartbeat_acked()
    }

    pub fn latency(&self) -> Option<Duration> {
        self.session.latency()
    }

    // === Handshake ===

    /// Dial the gateway URL and wait for Hello
    pub async fn connect(&mut self, cancel: &CancellationToken) -> GatewayResult<HelloPayload> {
        let url = self.session.gateway_url();
        self.open(&url, cancel).await
    }

    /// Send Identify on the current connection
    pub async fn identify(&mut self) -> GatewayResult<()> {
        self.ensure_open()?;
        if self.connection.is_none() {
            return Err(GatewayError::NotConnected);
        }

        let payload = IdentifyPayload {
            token: self.config.token.clone(),
            properties: self.config.properties.clone(),
            compress: false,
            large_threshold: self.config.large_threshold,
            shard: self.config.shard,
            intents: self.config.intents,
        };
        let message = GatewayMessage::identify(&payload)?;

        self.session.set_resuming(false);
        self.session.set_state(if self.established {
            ConnectionState::Reidentifying
        } else {
            ConnectionState::Identifying
        });
        self.send(&message).await?;

        tracing::info!(
            shard = ?self.config.shard,
            intents = self.config.intents.bits(),
            "Sent Identify"
        );
        Ok(())
    }

    /// Dial the cached resume URL and send Resume
    ///
    /// Not attempted without a cached session id and resume URL.
    pub async fn resume(&mut self, cancel: &CancellationToken) -> GatewayResult<()> {
        let Some(target) = self.session.resume_target() else {
            return Err(GatewayError::NoResumableSession);
        };

        self.open(&target.resume_url, cancel).await?;

        let payload = ResumePayload {
            token: self.config.token.clone(),
            session_id: target.session_id,
            seq: self.session.sequence(),
        };
        let message = GatewayMessage::resume(&payload)?;

        self.session.set_resuming(true);
        self.session.set_state(ConnectionState::Resuming);
        self.send(&message).await?;

        tracing::info!(session_id = %payload.session_id, seq = payload.seq, "Sent Resume");
        Ok(())
    }

    /// Close with a normal closure and stop every task; idempotent
    pub async fn shutdown(&mut self) {
        if self.session.state() == ConnectionState::Closed && self.connection.is_none() {
            return;
        }

        self.drop_connection(CloseCode::NORMAL).await;
        self.session.set_state(ConnectionState::Closed);

        tracing::info!(session_id = ?self.session.session_id(), "Gateway session shut down");
    }

    // === Main loop ===

    /// Connect, identify and keep the session alive until `cancel` fires
    ///
    /// Returns `Ok(())` once cancelled and an error only for failures the
    /// reconnect policy cannot absorb. The client is shut down either way.
    pub async fn run(&mut self, cancel: CancellationToken) -> GatewayResult<()> {
        self.ensure_open()?;

        let reason = self.drive(&cancel).await;
        self.shutdown().await;

        match reason {
            GatewayError::Cancelled => {
                tracing::info!("Gateway session cancelled");
                Ok(())
            }
            error => {
                tracing::error!(error = %error, "Gateway session failed");
                Err(error)
            }
        }
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> GatewayError {
        let mut pending = match self.start(cancel).await {
            Ok(pending) => pending,
            Err(e) => return e,
        };

        loop {
            let trigger = match pending.take() {
                Some(trigger) => trigger,
                None => match self.pump(cancel).await {
                    Ok(trigger) => trigger,
                    Err(e) => return e,
                },
            };

            match self.reconnect(trigger, cancel).await {
                Ok(next) => pending = next,
                Err(e) => return e,
            }
        }
    }

    /// First handshake; a gateway that cannot even be dialed is fatal here
    async fn start(&mut self, cancel: &CancellationToken) -> GatewayResult<Option<ReconnectTrigger>> {
        match self.connect(cancel).await {
            Ok(_) => {}
            Err(e @ GatewayError::Transport(TransportError::Dial { .. })) => return Err(e),
            Err(e) => return into_trigger(e).map(Some),
        }

        match self.identify().await {
            Ok(()) => Ok(None),
            Err(e) => into_trigger(e).map(Some),
        }
    }

    /// Feed connection events through the state machine until one demands a reconnect
    async fn pump(&mut self, cancel: &CancellationToken) -> GatewayResult<ReconnectTrigger> {
        loop {
            let Some(connection) = self.connection.as_mut() else {
                return Ok(ReconnectTrigger::Transport("no open connection".to_string()));
            };

            let event = tokio::select! {
                () = cancel.cancelled() => return Err(GatewayError::Cancelled),
                event = connection.next_event() => event,
            };

            let trigger = match event {
                None => Some(ReconnectTrigger::Transport("event queue closed".to_string())),
                Some(ConnectionEvent::Message(message)) => {
                    // A slow event sink must not hold up cancellation
                    let handled = tokio::select! {
                        () = cancel.cancelled() => return Err(GatewayError::Cancelled),
                        handled = self.handle_packet(message) => handled,
                    };
                    match handled {
                        Ok(trigger) => trigger,
                        Err(e) => Some(into_trigger(e)?),
                    }
                }
                Some(ConnectionEvent::DecodeFailed(e)) => {
                    tracing::warn!(error = %e, "Undecodable frame; dropping connection");
                    Some(ReconnectTrigger::Decode)
                }
                Some(ConnectionEvent::Closed(frame)) => match classify_close(frame.as_ref()) {
                    CloseOutcome::Fatal(code) => {
                        tracing::error!(code = code.as_u16(), reason = %code, "Gateway closed the session");
                        return Err(GatewayError::Rejected(code));
                    }
                    CloseOutcome::Reconnect(trigger) => Some(trigger),
                },
                Some(ConnectionEvent::TransportFailed(e)) => {
                    Some(ReconnectTrigger::Transport(e.to_string()))
                }
                Some(ConnectionEvent::Zombie) => Some(ReconnectTrigger::Zombie),
            };

            if let Some(trigger) = trigger {
                return Ok(trigger);
            }
        }
    }

    /// Replace the current connection according to the reconnect policy
    ///
    /// Returns the trigger for another attempt when this one failed recoverably.
    async fn reconnect(
        &mut self,
        trigger: ReconnectTrigger,
        cancel: &CancellationToken,
    ) -> GatewayResult<Option<ReconnectTrigger>> {
        tracing::warn!(
            trigger = %trigger,
            session_id = ?self.session.session_id(),
            seq = self.session.sequence(),
            "Reconnecting"
        );

        self.drop_connection(CloseCode::RESUMABLE).await;

        let mut action = decide(&trigger, self.session.has_resume_target());
        if action == ReconnectAction::Resume
            && self.resume_attempts >= self.config.reconnect.max_resume_attempts
        {
            tracing::warn!(
                attempts = self.resume_attempts,
                "Resume keeps failing; starting a new session"
            );
            action = ReconnectAction::Identify;
        }

        let delay = self.backoff.next_delay();
        if !delay.is_zero() {
            tracing::info!(
                delay_ms = delay.as_millis(),
                attempt = self.backoff.attempts(),
                "Waiting before reconnecting"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(GatewayError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        let attempt = match action {
            ReconnectAction::Resume => {
                self.resume_attempts += 1;
                self.resume(cancel).await
            }
            ReconnectAction::Identify => {
                self.session.clear_identity();
                self.resume_attempts = 0;
                match self.connect(cancel).await {
                    Ok(_) => self.identify().await,
                    Err(e) => Err(e),
                }
            }
        };

        match attempt {
            Ok(()) => Ok(None),
            Err(e) => {
                let next = into_trigger(e)?;
                tracing::warn!(error = %next, "Reconnect attempt failed");
                Ok(Some(next))
            }
        }
    }

    // === Connection handling ===

    /// Dial `url` and complete the Hello exchange on a new connection
    async fn open(&mut self, url: &str, cancel: &CancellationToken) -> GatewayResult<HelloPayload> {
        self.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        self.drop_connection(CloseCode::RESUMABLE).await;
        self.session.set_state(ConnectionState::Connecting);
        tracing::info!(url = %url, shard = ?self.config.shard, "Connecting to gateway");

        let dialed = tokio::select! {
            () = cancel.cancelled() => return Err(GatewayError::Cancelled),
            dialed = self.transport.dial(url) => dialed,
        };
        let (sink, stream) = match dialed {
            Ok(halves) => halves,
            Err(e) => {
                self.session.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        self.connections_opened += 1;
        let mut connection = Connection::open(
            self.connections_opened,
            url,
            sink,
            stream,
            self.config.queue_capacity,
            cancel,
        );
        self.session.set_state(ConnectionState::AwaitingHello);

        let hello = match connection.read_hello(self.config.hello_timeout, cancel).await {
            Ok(hello) => hello,
            Err(e) => {
                let fatal = e.is_fatal();
                let code = if fatal { CloseCode::NORMAL } else { CloseCode::RESUMABLE };
                connection.close(code, self.config.close_timeout).await;

                if fatal {
                    tracing::error!(url = %url, error = %e, "Gateway handshake failed");
                    self.session.set_state(ConnectionState::Closed);
                } else {
                    self.session.set_state(ConnectionState::Disconnected);
                }
                return Err(e);
            }
        };

        tracing::info!(
            connection_id = connection.id(),
            heartbeat_interval_ms = hello.heartbeat_interval,
            "Received Hello"
        );

        self.session.begin_connection(hello.interval());
        connection.start_reader();
        self.connection = Some(connection);
        self.session.set_state(ConnectionState::Identifying);

        Ok(hello)
    }

    async fn drop_connection(&mut self, code: u16) {
        if let Some(mut connection) = self.connection.take() {
            connection.close(code, self.config.close_timeout).await;
        }
        if self.session.state() != ConnectionState::Closed {
            self.session.set_state(ConnectionState::Disconnected);
        }
    }

    pub(super) async fn send(&self, message: &GatewayMessage) -> GatewayResult<()> {
        self.connection
            .as_ref()
            .ok_or(GatewayError::NotConnected)?
            .send(message)
            .await
    }

    fn ensure_open(&self) -> GatewayResult<()> {
        if self.session.state() == ConnectionState::Closed {
            return Err(GatewayError::Closed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("state", &self.session.state())
            .field("session_id", &self.session.session_id())
            .field("sequence", &self.session.sequence())
            .field("connection", &self.connection)
            .field("resume_attempts", &self.resume_attempts)
            .finish_non_exhaustive()
    }
}

/// Route a failed operation through the reconnect policy, unless it must end the session
fn into_trigger(error: GatewayError) -> GatewayResult<ReconnectTrigger> {
    match error {
        GatewayError::SessionInvalidated(code) => Ok(ReconnectTrigger::SessionInvalidated(code)),
        GatewayError::Cancelled => Err(error),
        error if error.is_fatal() => Err(error),
        error => Ok(ReconnectTrigger::Transport(error.to_string())),
    }
}
