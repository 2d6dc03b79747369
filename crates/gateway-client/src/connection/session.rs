//! Session state shared between the coordinator and its tasks
//!
//! Holds the lifecycle state, the cached resume identity and the heartbeat
//! bookkeeping. Everything except the sequence number lives behind one lock.

use super::SequenceTracker;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Lifecycle state of the gateway session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No connection, not shut down
    Disconnected,
    /// Dialing the gateway
    Connecting,
    /// Dialed, waiting for the first frame
    AwaitingHello,
    /// Hello received, Identify sent
    Identifying,
    /// READY or RESUMED received
    Active,
    /// Resume sent on a fresh connection
    Resuming,
    /// Identify sent after a previous session was lost
    Reidentifying,
    /// Shut down; terminal
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Active => "active",
            Self::Resuming => "resuming",
            Self::Reidentifying => "reidentifying",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Session id and resume URL from the last READY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeTarget {
    pub session_id: String,
    pub resume_url: String,
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    gateway_url: String,
    session_id: Option<String>,
    resume_url: Option<String>,
    resuming: bool,
    heartbeat_interval: Option<Duration>,
    heartbeat_acked: bool,
    last_heartbeat_sent: Option<Instant>,
    last_heartbeat_ack: Option<Instant>,
}

/// Observable session state
///
/// Cloned out of the client as an `Arc` so callers can watch a running
/// session while `run()` owns the client.
#[derive(Debug)]
pub struct Session {
    inner: Mutex<Inner>,
    sequence: SequenceTracker,
}

impl Session {
    #[must_use]
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                gateway_url: gateway_url.into(),
                session_id: None,
                resume_url: None,
                resuming: false,
                heartbeat_interval: None,
                heartbeat_acked: true,
                last_heartbeat_sent: None,
                last_heartbeat_ack: None,
            }),
            sequence: SequenceTracker::new(),
        }
    }

    // === Lifecycle ===

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.inner.lock().state, state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Session state changed");
        }
    }

    /// URL used for fresh connections
    pub fn gateway_url(&self) -> String {
        self.inner.lock().gateway_url.clone()
    }

    // === Identity ===

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    pub fn resume_url(&self) -> Option<String> {
        self.inner.lock().resume_url.clone()
    }

    /// Cached identity, only when both parts are present and non-empty
    pub fn resume_target(&self) -> Option<ResumeTarget> {
        let inner = self.inner.lock();
        match (&inner.session_id, &inner.resume_url) {
            (Some(id), Some(url)) if !id.is_empty() && !url.is_empty() => Some(ResumeTarget {
                session_id: id.clone(),
                resume_url: url.clone(),
            }),
            _ => None,
        }
    }

    pub fn has_resume_target(&self) -> bool {
        self.resume_target().is_some()
    }

    /// Cache the identity from READY and clear any outstanding heartbeat
    pub(crate) fn establish(&self, session_id: String, resume_url: String) {
        let mut inner = self.inner.lock();
        inner.session_id = Some(session_id);
        inner.resume_url = Some(resume_url);
        inner.resuming = false;
        inner.heartbeat_acked = true;
    }

    /// Drop the cached identity; the next handshake starts a new session
    pub(crate) fn clear_identity(&self) {
        {
            let mut inner = self.inner.lock();
            inner.session_id = None;
            inner.resume_url = None;
            inner.resuming = false;
        }
        self.sequence.reset();
    }

    pub fn is_resuming(&self) -> bool {
        self.inner.lock().resuming
    }

    pub(crate) fn set_resuming(&self, resuming: bool) {
        self.inner.lock().resuming = resuming;
    }

    // === Sequence ===

    /// Highest sequence observed, `-1` if none
    pub fn sequence(&self) -> i64 {
        self.sequence.current()
    }

    pub(crate) fn observe_sequence(&self, seq: i64) -> i64 {
        self.sequence.observe(seq)
    }

    // === Heartbeat ===

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.inner.lock().heartbeat_interval
    }

    /// Record the interval of a new connection and forget the old one's pending beat
    pub(crate) fn begin_connection(&self, interval: Duration) {
        let mut inner = self.inner.lock();
        inner.heartbeat_interval = Some(interval);
        inner.heartbeat_acked = true;
        inner.last_heartbeat_sent = None;
    }

    pub fn is_heartbeat_acked(&self) -> bool {
        self.inner.lock().heartbeat_acked
    }

    pub(crate) fn acknowledge_heartbeat(&self) {
        let mut inner = self.inner.lock();
        inner.heartbeat_acked = true;
        inner.last_heartbeat_ack = Some(Instant::now());
    }

    /// Claim the right to send a heartbeat
    ///
    /// Returns the sequence to send and marks the beat pending, or `None`
    /// when the previous beat is still unacknowledged. Check and mark happen
    /// under one lock so two senders can never both pass.
    pub(crate) fn claim_heartbeat(&self) -> Option<i64> {
        let mut inner = self.inner.lock();
        if !inner.heartbeat_acked {
            return None;
        }
        inner.heartbeat_acked = false;
        inner.last_heartbeat_sent = Some(Instant::now());
        Some(self.sequence.current())
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.last_heartbeat_sent, inner.last_heartbeat_ack) {
            (Some(sent), Some(ack)) if ack >= sent => Some(ack - sent),
            _ => None,
        }
    }
}
