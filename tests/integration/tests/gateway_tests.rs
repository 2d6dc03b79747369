//! Gateway Integration Tests
//!
//! Drive the client over real sockets against the mock gateway.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_client::bootstrap::{GatewayLocator, HttpGatewayLocator};
use gateway_client::error::BootstrapError;
use gateway_client::events::{ChannelSink, DispatchEvent};
use gateway_client::protocol::CloseCode;
use gateway_client::transport::TungsteniteTransport;
use gateway_client::{ClientConfig, ConnectionState, GatewayClient, GatewayError, GatewayResult};
use gateway_common::{AppConfig, ReconnectConfig};
use integration_tests::{dispatch, ready, wait_until, MockGateway, MockSocket, WAIT};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "test-token";

fn locator(gateway: &MockGateway, token: &str) -> HttpGatewayLocator {
    HttpGatewayLocator::new(gateway.api_base(), token, 10, WAIT).unwrap()
}

fn config() -> ClientConfig {
    ClientConfig::new(TOKEN).with_reconnect(ReconnectConfig {
        base_delay_ms: 50,
        max_delay_ms: 500,
        jitter: 0.0,
        max_resume_attempts: 3,
    })
}

struct Running {
    session: Arc<gateway_client::connection::Session>,
    events: mpsc::Receiver<DispatchEvent>,
    cancel: CancellationToken,
    task: JoinHandle<GatewayResult<()>>,
}

impl Running {
    async fn next_event(&mut self) -> DispatchEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("no dispatch event")
            .expect("sink dropped")
    }

    async fn finish(self) -> GatewayResult<()> {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("client did not stop")
            .expect("client task panicked")
    }
}

async fn start_client(gateway: &MockGateway) -> Running {
    let (sink, events) = ChannelSink::new(64);
    let mut client = GatewayClient::bootstrap(
        &locator(gateway, TOKEN),
        config(),
        Arc::new(TungsteniteTransport::new()),
        Arc::new(sink),
    )
    .await
    .expect("bootstrap failed");

    let session = client.session();
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { client.run(cancel).await }
    });

    Running {
        session,
        events,
        cancel,
        task,
    }
}

/// Hello, Identify, READY and the acknowledged READY heartbeat
async fn handshake(gateway: &mut MockGateway, running: &mut Running) -> MockSocket {
    let mut socket = gateway.accept().await.unwrap();
    socket.hello(45_000).await.unwrap();

    let identify = socket.recv_json().await.unwrap();
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], TOKEN);
    assert_eq!(identify["d"]["shard"], serde_json::json!([0, 1]));

    socket
        .send_json(&ready("session-1", &gateway.gateway_url(), 1))
        .await
        .unwrap();

    let heartbeat = socket.recv_json().await.unwrap();
    assert_eq!(heartbeat["op"], 1);
    assert_eq!(heartbeat["d"], -1);
    socket.send_json(&serde_json::json!({"op": 11})).await.unwrap();

    let session = running.session.clone();
    wait_until(move || session.state() == ConnectionState::Active && session.is_heartbeat_acked())
        .await
        .unwrap();
    assert_eq!(running.next_event().await.name, "READY");

    socket
}

// ============================================================================
// Bootstrap Tests
// ============================================================================

#[tokio::test]
async fn test_bootstrap_locates_decorated_url() {
    let gateway = MockGateway::start(TOKEN).await.unwrap();
    let locator = locator(&gateway, TOKEN);

    let info = locator.fetch().await.unwrap();
    assert_eq!(info.url, gateway.gateway_url());
    assert_eq!(info.shards, Some(1));
    assert_eq!(info.session_start_limit.map(|l| l.remaining), Some(999));

    let url = locator.locate().await.unwrap();
    assert_eq!(url, format!("{}?v=10&encoding=json", gateway.gateway_url()));
}

#[tokio::test]
async fn test_bootstrap_rejects_bad_token() {
    let gateway = MockGateway::start(TOKEN).await.unwrap();

    let response = gateway.get_auth("/gateway/bot", "wrong").await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let err = locator(&gateway, "wrong").locate().await.unwrap_err();
    assert!(matches!(err, BootstrapError::Unauthorized { status: 401 }));
    assert!(GatewayError::from(err).is_fatal());
}

#[tokio::test]
async fn test_bootstrap_reports_unexpected_status() {
    let gateway = MockGateway::start(TOKEN).await.unwrap();
    let locator = HttpGatewayLocator::new(format!("{}/missing", gateway.api_base()), TOKEN, 10, WAIT).unwrap();

    let err = locator.fetch().await.unwrap_err();
    assert!(matches!(err, BootstrapError::Status { status: 404 }));
}

// ============================================================================
// Session Tests
// ============================================================================

#[tokio::test]
async fn test_session_reaches_active_and_closes_normally() {
    let mut gateway = MockGateway::start(TOKEN).await.unwrap();
    let mut running = start_client(&gateway).await;

    let mut socket = handshake(&mut gateway, &mut running).await;
    assert_eq!(running.session.session_id().as_deref(), Some("session-1"));

    socket.send_json(&dispatch("MESSAGE_CREATE", 2)).await.unwrap();
    let event = running.next_event().await;
    assert_eq!(event.name, "MESSAGE_CREATE");
    assert_eq!(event.sequence, Some(2));
    assert_eq!(running.session.sequence(), 2);

    running.cancel.cancel();
    assert_eq!(socket.recv_close().await.unwrap(), Some(CloseCode::NORMAL));
    assert!(running.finish().await.is_ok());
}

#[tokio::test]
async fn test_dials_with_version_and_encoding() {
    let mut gateway = MockGateway::start(TOKEN).await.unwrap();
    let running = start_client(&gateway).await;

    let socket = gateway.accept().await.unwrap();
    let query = socket.query().unwrap_or_default();
    assert!(query.contains("v=10"), "{query}");
    assert!(query.contains("encoding=json"), "{query}");

    running.cancel.cancel();
    assert!(running.finish().await.is_ok());
}

#[tokio::test]
async fn test_resumes_after_server_drops_connection() {
    let mut gateway = MockGateway::start(TOKEN).await.unwrap();
    let mut running = start_client(&gateway).await;

    let mut socket = handshake(&mut gateway, &mut running).await;
    socket.send_json(&dispatch("MESSAGE_CREATE", 5)).await.unwrap();
    assert_eq!(running.next_event().await.sequence, Some(5));
    drop(socket);

    let mut resumed = gateway.accept().await.unwrap();
    resumed.hello(45_000).await.unwrap();

    let resume = resumed.recv_json().await.unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["token"], TOKEN);
    assert_eq!(resume["d"]["session_id"], "session-1");
    assert_eq!(resume["d"]["seq"], 5);
    assert_eq!(running.session.state(), ConnectionState::Resuming);

    resumed
        .send_json(&serde_json::json!({"op": 0, "t": "RESUMED", "s": 6, "d": {}}))
        .await
        .unwrap();

    let session = running.session.clone();
    wait_until(move || session.state() == ConnectionState::Active)
        .await
        .unwrap();
    assert_eq!(running.session.sequence(), 6);
    assert!(!running.session.is_resuming());
    assert_eq!(running.next_event().await.name, "RESUMED");

    running.cancel.cancel();
    assert!(running.finish().await.is_ok());
}

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    let mut gateway = MockGateway::start(TOKEN).await.unwrap();
    let running = start_client(&gateway).await;

    let mut socket = gateway.accept().await.unwrap();
    socket.hello(45_000).await.unwrap();
    assert_eq!(socket.recv_json().await.unwrap()["op"], 2);
    socket.close(4004).await.unwrap();

    let result = running.finish().await;
    assert!(matches!(
        result,
        Err(GatewayError::Rejected(CloseCode::AuthenticationFailed))
    ));
}

#[tokio::test]
async fn test_run_from_app_config() {
    let mut gateway = MockGateway::start(TOKEN).await.unwrap();

    let vars: HashMap<&str, String> = [
        ("BOT_TOKEN", TOKEN.to_string()),
        ("API_BASE_URL", gateway.api_base()),
        ("SHARD_ID", "1".to_string()),
        ("SHARD_COUNT", "2".to_string()),
        ("RECONNECT_JITTER", "0".to_string()),
    ]
    .into_iter()
    .collect();
    let config = AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { gateway_client::run(&config, cancel).await }
    });

    let mut socket = gateway.accept().await.unwrap();
    socket.hello(45_000).await.unwrap();
    let identify = socket.recv_json().await.unwrap();
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["shard"], serde_json::json!([1, 2]));

    cancel.cancel();
    let result = tokio::time::timeout(WAIT, task)
        .await
        .expect("client did not stop")
        .expect("client task panicked");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_run_stops_when_cancelled_before_lookup() {
    let gateway = MockGateway::start(TOKEN).await.unwrap();
    let vars: HashMap<&str, String> = [("BOT_TOKEN", TOKEN.to_string()), ("API_BASE_URL", gateway.api_base())]
        .into_iter()
        .collect();
    let config = AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), gateway_client::run(&config, cancel))
        .await
        .expect("run ignored cancellation");
    assert!(result.is_ok());
}
