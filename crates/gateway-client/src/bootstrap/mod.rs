//! Gateway URL discovery
//!
//! Looks up the WebSocket URL over the REST API before the first dial and
//! decorates gateway URLs with the protocol version and encoding.

use crate::error::BootstrapError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

/// Session start budget reported by the bot gateway endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the budget resets
    pub reset_after: u64,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: u32,
}

fn default_concurrency() -> u32 {
    1
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayInfo {
    pub url: String,
    #[serde(default)]
    pub shards: Option<u32>,
    #[serde(default)]
    pub session_start_limit: Option<SessionStartLimit>,
}

/// Resolves the URL of the gateway to dial
#[async_trait]
pub trait GatewayLocator: Send + Sync {
    async fn locate(&self) -> Result<String, BootstrapError>;
}

/// Fixed URL, already decorated
#[derive(Debug, Clone)]
pub struct StaticGatewayLocator {
    url: String,
}

impl StaticGatewayLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl GatewayLocator for StaticGatewayLocator {
    async fn locate(&self) -> Result<String, BootstrapError> {
        Ok(self.url.clone())
    }
}

/// Asks the REST API for the gateway URL
#[derive(Debug, Clone)]
pub struct HttpGatewayLocator {
    client: Client,
    api_base: String,
    token: String,
    version: u8,
}

impl HttpGatewayLocator {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        version: u8,
        timeout: Duration,
    ) -> Result<Self, BootstrapError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            version,
        })
    }

    /// Fetch the full bot gateway description
    pub async fn fetch(&self) -> Result<GatewayInfo, BootstrapError> {
        let endpoint = format!("{}/gateway/bot", self.api_base);

        let response = self
            .client
            .get(&endpoint)
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BootstrapError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(BootstrapError::Status {
                status: status.as_u16(),
            });
        }

        let info: GatewayInfo = response.json().await?;

        if let Some(limit) = &info.session_start_limit {
            tracing::debug!(
                remaining = limit.remaining,
                total = limit.total,
                reset_after_ms = limit.reset_after,
                "Session start budget"
            );
            if limit.remaining == 0 {
                tracing::warn!(
                    reset_after_ms = limit.reset_after,
                    "Session start budget exhausted; Identify may be rejected"
                );
            }
        }

        Ok(info)
    }
}

#[async_trait]
impl GatewayLocator for HttpGatewayLocator {
    async fn locate(&self) -> Result<String, BootstrapError> {
        let info = self.fetch().await?;
        let url = with_gateway_query(&info.url, self.version)?;
        tracing::info!(url = %url, shards = ?info.shards, "Gateway located");
        Ok(url)
    }
}

/// Set `v=<version>&encoding=json` on a gateway URL, replacing any previous values
pub fn with_gateway_query(url: &str, version: u8) -> Result<String, BootstrapError> {
    let mut parsed = Url::parse(url).map_err(|e| BootstrapError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "v" && k != "encoding")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("v", &version.to_string())
        .append_pair("encoding", "json");

    Ok(parsed.into())
}
