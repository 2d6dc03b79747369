//! Control payload definitions
//!
//! Fixed-shape records carried in the `d` field of control messages.

use super::Intents;
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    /// Create a Hello payload with the given interval
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }

    /// Negotiated interval as a `Duration`
    #[must_use]
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval)
    }
}

/// Payload for op 2 (Identify)
///
/// Sent by the client to start a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Bot credential
    pub token: String,

    /// Static client properties
    pub properties: IdentifyProperties,

    /// Payload compression is never requested
    #[serde(default)]
    pub compress: bool,

    /// Member count above which a guild is considered large
    pub large_threshold: u32,

    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],

    /// Requested event groups
    pub intents: Intents,
}

/// Client connection properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    /// Library name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,

    /// Library name, again
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl IdentifyProperties {
    /// Create empty properties
    #[must_use]
    pub fn new() -> Self {
        Self {
            os: None,
            browser: None,
            device: None,
        }
    }

    /// Properties describing this process and library
    #[must_use]
    pub fn current() -> Self {
        Self::new()
            .with_os(std::env::consts::OS)
            .with_browser(env!("CARGO_PKG_NAME"))
            .with_device(env!("CARGO_PKG_NAME"))
    }

    /// Set operating system
    #[must_use]
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    /// Set browser
    #[must_use]
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = Some(browser.into());
        self
    }

    /// Set device type
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::current()
    }
}

/// Payload for op 6 (Resume)
///
/// Sent by the client to resume a disconnected session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Bot credential
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: i64,
}

/// Data of the `READY` dispatch
///
/// Only the fields the session needs; everything else stays in the raw payload
/// forwarded to the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Session ID used for Resume
    pub session_id: String,

    /// Endpoint to dial when resuming
    pub resume_gateway_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_payload() {
        let hello: HelloPayload = serde_json::from_str(r#"{"heartbeat_interval":41250}"#).unwrap();
        assert_eq!(hello, HelloPayload::with_interval(41_250));
        assert_eq!(hello.interval(), std::time::Duration::from_millis(41_250));
    }

    #[test]
    fn test_identify_properties() {
        let props = IdentifyProperties::new()
            .with_os("windows")
            .with_browser("rust-client")
            .with_device("desktop");

        assert_eq!(props.os, Some("windows".to_string()));
        assert_eq!(props.browser, Some("rust-client".to_string()));
        assert_eq!(props.device, Some("desktop".to_string()));

        let current = IdentifyProperties::current();
        assert_eq!(current.os.as_deref(), Some(std::env::consts::OS));
        assert_eq!(current.browser.as_deref(), Some("gateway-client"));
    }

    #[test]
    fn test_identify_payload_serialization() {
        let payload = IdentifyPayload {
            token: "token123".to_string(),
            properties: IdentifyProperties::new().with_os("linux"),
            compress: false,
            large_threshold: 50,
            shard: [0, 1],
            intents: Intents::GUILDS | Intents::GUILD_MESSAGES,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["token"], "token123");
        assert_eq!(value["properties"]["os"], "linux");
        assert!(value["properties"].get("browser").is_none());
        assert_eq!(value["shard"], serde_json::json!([0, 1]));
        assert_eq!(value["intents"], 513);
        assert_eq!(value["compress"], false);
    }

    #[test]
    fn test_resume_payload_serialization() {
        let payload = ResumePayload {
            token: "token123".to_string(),
            session_id: "session456".to_string(),
            seq: 42,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["session_id"], "session456");
        assert_eq!(value["seq"], 42);
    }

    #[test]
    fn test_ready_ignores_extra_fields() {
        let ready: ReadyPayload = serde_json::from_str(
            r#"{"v":10,"user":{"id":"1"},"session_id":"abc","resume_gateway_url":"wss://x","guilds":[]}"#,
        )
        .unwrap();
        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.resume_gateway_url, "wss://x");
    }
}
