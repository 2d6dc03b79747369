//! Gateway message format
//!
//! Defines the wire envelope shared by every frame, the client-side
//! constructors and the lazy decoding of server payloads.

use super::{HelloPayload, IdentifyPayload, OpCode, ReadyPayload, ResumePayload};
use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};

/// Longest body quoted verbatim in decode errors
const MAX_QUOTED_BODY: usize = 512;

/// Gateway message envelope
///
/// `{op, t, s, d}` where `d` stays undecoded until a handler asks for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Raw operation code; unknown values are kept so they can be logged and skipped
    pub op: i64,

    /// Event type (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,

    /// Opaque event data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Box<RawValue>>,
}

impl GatewayMessage {
    fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, ProtocolError> {
        let d = to_raw_value(payload).map_err(|source| ProtocolError::Encode { op, source })?;
        Ok(Self {
            op: i64::from(op.as_u8()),
            t: None,
            s: None,
            d: Some(d),
        })
    }

    // === Client Messages ===

    /// Create an Identify message (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, ProtocolError> {
        Self::with_payload(OpCode::Identify, payload)
    }

    /// Create a Resume message (op=6)
    pub fn resume(payload: &ResumePayload) -> Result<Self, ProtocolError> {
        Self::with_payload(OpCode::Resume, payload)
    }

    /// Create a Heartbeat message (op=1) carrying the last sequence seen
    pub fn heartbeat(sequence: i64) -> Result<Self, ProtocolError> {
        Self::with_payload(OpCode::Heartbeat, &sequence)
    }

    // === Parsing Server Messages ===

    /// Known op code, if any
    #[must_use]
    pub fn opcode(&self) -> Option<OpCode> {
        u8::try_from(self.op).ok().and_then(OpCode::from_u8)
    }

    /// Event type, empty for non-dispatch messages
    #[must_use]
    pub fn event_type(&self) -> &str {
        self.t.as_deref().unwrap_or_default()
    }

    /// Decode `d` into a concrete payload
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let raw = self.d.as_ref().ok_or_else(|| ProtocolError::MissingPayload {
            op: self.op,
            event: self.t.clone(),
        })?;
        serde_json::from_str(raw.get()).map_err(|source| ProtocolError::Decode {
            source,
            body: quote_body(raw.get()),
        })
    }

    /// Parse the Hello payload (op=10)
    pub fn as_hello(&self) -> Result<HelloPayload, ProtocolError> {
        self.data()
    }

    /// Parse the READY dispatch data
    pub fn as_ready(&self) -> Result<ReadyPayload, ProtocolError> {
        self.data()
    }

    /// Parse the resumable flag of an Invalid Session message (op=9)
    pub fn as_invalid_session(&self) -> Result<bool, ProtocolError> {
        self.data()
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|source| ProtocolError::Decode {
            source,
            body: quote_body(json),
        })
    }
}

fn quote_body(body: &str) -> String {
    if body.len() <= MAX_QUOTED_BODY {
        return body.to_string();
    }
    let mut end = MAX_QUOTED_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            Some(op) => write!(f, "GatewayMessage(op={op}")?,
            None => write!(f, "GatewayMessage(op={} (unknown)", self.op)?,
        }
        if let Some(t) = &self.t {
            write!(f, ", t={t}")?;
        }
        if let Some(s) = self.s {
            write!(f, ", s={s}")?;
        }
        write!(f, ")")
    }
}
