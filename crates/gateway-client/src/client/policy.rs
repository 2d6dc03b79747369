//! Reconnect policy
//!
//! Maps a reconnect trigger and the cached identity to the next handshake,
//! and spaces out consecutive failed attempts.

use crate::protocol::CloseCode;
use crate::transport::CloseFrame;
use gateway_common::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Why the current connection is being replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectTrigger {
    /// Heartbeat went unacknowledged
    Zombie,
    /// Read or write failure, or a failed reconnect attempt
    Transport(String),
    /// Peer closed with a recoverable code (or none)
    Closed(Option<u16>),
    /// Peer closed with a code that invalidates the session
    SessionInvalidated(CloseCode),
    /// Server sent op 7
    ServerReconnect,
    /// Server sent op 9
    InvalidSession { resumable: bool },
    /// Frame or payload could not be decoded
    Decode,
}

impl std::fmt::Display for ReconnectTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zombie => f.write_str("heartbeat not acknowledged"),
            Self::Transport(reason) => write!(f, "transport failure: {reason}"),
            Self::Closed(Some(code)) => write!(f, "closed by server ({code})"),
            Self::Closed(None) => f.write_str("closed by server"),
            Self::SessionInvalidated(code) => write!(f, "session invalidated: {code}"),
            Self::ServerReconnect => f.write_str("server requested reconnect"),
            Self::InvalidSession { resumable } => {
                write!(f, "invalid session (resumable={resumable})")
            }
            Self::Decode => f.write_str("undecodable frame"),
        }
    }
}

/// Handshake to perform on the next connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    Resume,
    Identify,
}

/// Pick the next handshake
///
/// Only a resumable session with a cached identity is resumed; everything
/// that invalidated the session falls back to Identify.
#[must_use]
pub fn decide(trigger: &ReconnectTrigger, has_identity: bool) -> ReconnectAction {
    let resumable = !matches!(
        trigger,
        ReconnectTrigger::InvalidSession { resumable: false } | ReconnectTrigger::SessionInvalidated(_)
    );

    if resumable && has_identity {
        ReconnectAction::Resume
    } else {
        ReconnectAction::Identify
    }
}

/// What a close frame means for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Never reconnect
    Fatal(CloseCode),
    Reconnect(ReconnectTrigger),
}

#[must_use]
pub fn classify_close(frame: Option<&CloseFrame>) -> CloseOutcome {
    let raw = frame.map(|f| f.code);
    match raw.and_then(CloseCode::from_u16) {
        Some(code) if !code.should_reconnect() => CloseOutcome::Fatal(code),
        Some(code) if code.invalidates_session() => {
            CloseOutcome::Reconnect(ReconnectTrigger::SessionInvalidated(code))
        }
        _ => CloseOutcome::Reconnect(ReconnectTrigger::Closed(raw)),
    }
}

/// Exponential backoff with jitter between consecutive failed attempts
///
/// The first attempt after a reset is immediate.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    attempts: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            jitter: if config.jitter.is_finite() {
                config.jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
            attempts: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let attempt = self.attempts;
        self.attempts = self.attempts.saturating_add(1);
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(31);
        let delay = self.base.saturating_mul(1_u32 << exponent).min(self.max);
        if self.jitter <= 0.0 {
            return delay;
        }

        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + factor)).unwrap_or(delay)
    }

    /// Forget past failures
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
