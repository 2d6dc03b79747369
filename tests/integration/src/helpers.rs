//! Test helpers for integration tests
//!
//! Provides a mock gateway: `GET /gateway/bot` answers like the real REST
//! API and `/ws` hands every upgraded socket to the test.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Upper bound on any single wait in a test
pub const WAIT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct MockState {
    token: String,
    addr: SocketAddr,
    sockets: mpsc::UnboundedSender<MockSocket>,
}

/// Mock gateway instance that manages lifecycle
pub struct MockGateway {
    pub addr: SocketAddr,
    pub client: Client,
    sockets: mpsc::UnboundedReceiver<MockSocket>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    /// Start a mock gateway accepting `token`
    pub async fn start(token: &str) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let (tx, sockets) = mpsc::unbounded_channel();

        let state = MockState {
            token: token.to_string(),
            addr,
            sockets: tx,
        };

        let app = Router::new()
            .route("/gateway/bot", get(gateway_bot))
            .route("/ws", get(gateway_ws))
            .with_state(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let client = Client::builder().timeout(WAIT).build()?;

        Ok(Self {
            addr,
            client,
            sockets,
            _handle: handle,
        })
    }

    /// Base URL of the REST API
    pub fn api_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Undecorated gateway URL, as `/gateway/bot` reports it
    pub fn gateway_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Wait for the client to open the next WebSocket
    pub async fn accept(&mut self) -> Result<MockSocket> {
        tokio::time::timeout(WAIT, self.sockets.recv())
            .await
            .context("no WebSocket connection within the wait")?
            .context("mock gateway stopped")
    }

    /// Make a GET request with a bot token
    pub async fn get_auth(&self, path: &str, token: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.api_base(), path);
        Ok(self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {token}"))
            .send()
            .await?)
    }
}

async fn gateway_bot(State(state): State<MockState>, headers: HeaderMap) -> Response {
    let expected = format!("Bot {}", state.token);
    let presented = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

    if presented != Some(expected.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "401: Unauthorized", "code": 0})),
        )
            .into_response();
    }

    Json(json!({
        "url": format!("ws://{}/ws", state.addr),
        "shards": 1,
        "session_start_limit": {
            "total": 1000,
            "remaining": 999,
            "reset_after": 14_400_000,
            "max_concurrency": 1
        }
    }))
    .into_response()
}

async fn gateway_ws(
    State(state): State<MockState>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        state.sockets.send(MockSocket { socket, query }).ok();
    })
}

/// Server end of one client connection
pub struct MockSocket {
    socket: WebSocket,
    query: Option<String>,
}

impl MockSocket {
    /// Query string the client dialed with
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub async fn send_json(&mut self, value: &Value) -> Result<()> {
        self.socket.send(Message::Text(value.to_string())).await?;
        Ok(())
    }

    pub async fn hello(&mut self, interval_ms: u64) -> Result<()> {
        self.send_json(&json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}))
            .await
    }

    /// Next text frame from the client, parsed
    pub async fn recv_json(&mut self) -> Result<Value> {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.recv())
                .await
                .context("client sent nothing within the wait")?;

            match message {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(frame))) => {
                    bail!("client closed: {:?}", frame.map(|f| f.code))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => bail!("socket error: {e}"),
                None => bail!("client went away"),
            }
        }
    }

    /// Skip text frames until the client closes; returns its close code
    pub async fn recv_close(&mut self) -> Result<Option<u16>> {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.recv())
                .await
                .context("client did not close within the wait")?;

            match message {
                Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| f.code)),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }

    /// Close from the server side with `code`
    pub async fn close(mut self, code: u16) -> Result<()> {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: Cow::Borrowed(""),
            })))
            .await?;
        Ok(())
    }
}

/// READY dispatch for `session_id`
pub fn ready(session_id: &str, resume_url: &str, seq: i64) -> Value {
    json!({
        "op": 0,
        "t": "READY",
        "s": seq,
        "d": {"session_id": session_id, "resume_gateway_url": resume_url}
    })
}

pub fn dispatch(name: &str, seq: i64) -> Value {
    json!({"op": 0, "t": name, "s": seq, "d": {"seq": seq}})
}

/// Poll `condition` until it holds or the wait runs out
pub async fn wait_until(condition: impl Fn() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not reached within the wait");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
