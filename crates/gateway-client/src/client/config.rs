//! Client configuration

use crate::protocol::{IdentifyProperties, Intents};
use gateway_common::{AppConfig, ReconnectConfig};
use std::time::Duration;

/// Everything the session state machine needs besides its collaborators
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Credential sent in Identify and Resume
    pub token: String,
    pub properties: IdentifyProperties,
    pub intents: Intents,
    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],
    pub large_threshold: u32,
    /// Protocol version put on resume URLs
    pub gateway_version: u8,
    /// Capacity of each connection's event queue
    pub queue_capacity: usize,
    /// Bound on the wait for Hello after dialing
    pub hello_timeout: Duration,
    /// Bound on flushing a close frame
    pub close_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    /// Defaults for everything but the token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            properties: IdentifyProperties::current(),
            intents: Intents::DEFAULT,
            shard: [0, 1],
            large_threshold: 50,
            gateway_version: 10,
            queue_capacity: 64,
            hello_timeout: Duration::from_secs(20),
            close_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Build from the environment-backed application config
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            token: config.api.token.clone(),
            properties: IdentifyProperties::current(),
            intents: Intents::from_bits_retain(config.gateway.intents),
            shard: [config.gateway.shard_id, config.gateway.shard_count],
            large_threshold: config.gateway.large_threshold,
            gateway_version: config.gateway.version,
            queue_capacity: config.gateway.queue_capacity,
            hello_timeout: Duration::from_millis(config.gateway.hello_timeout_ms),
            close_timeout: Duration::from_millis(config.gateway.close_timeout_ms),
            reconnect: config.reconnect.clone(),
        }
    }

    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    #[must_use]
    pub fn with_shard(mut self, shard_id: u32, shard_count: u32) -> Self {
        self.shard = [shard_id, shard_count];
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}
