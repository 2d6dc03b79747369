//! Session state machine
//!
//! [`GatewayClient`] drives the handshake, feeds packets through the state
//! machine and applies the reconnect policy until cancelled or rejected.

mod config;
mod gateway;
mod packets;
mod policy;

pub use config::ClientConfig;
pub use gateway::GatewayClient;
pub use policy::{classify_close, decide, Backoff, CloseOutcome, ReconnectAction, ReconnectTrigger};

use crate::bootstrap::{GatewayLocator, HttpGatewayLocator};
use crate::error::GatewayResult;
use crate::events::LoggingSink;
use crate::transport::TungsteniteTransport;
use gateway_common::AppConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Locate the gateway over HTTP and run one session over WebSocket until cancelled
pub async fn run(config: &AppConfig, cancel: CancellationToken) -> GatewayResult<()> {
    let locator = HttpGatewayLocator::new(
        &config.api.base_url,
        &config.api.token,
        config.gateway.version,
        config.api.timeout(),
    )?;

    let url = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        url = locator.locate() => url?,
    };

    let mut client = GatewayClient::with_shared(
        ClientConfig::from_app_config(config),
        url,
        Arc::new(TungsteniteTransport::new()),
        Arc::new(LoggingSink),
    );
    client.run(cancel).await
}

