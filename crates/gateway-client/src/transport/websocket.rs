//! WebSocket transport on `tokio-tungstenite`

use super::{BoxFrameSink, BoxFrameStream, CloseFrame, Frame, FrameSink, FrameStream, Transport};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` and `wss://` URLs
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn dial(&self, url: &str) -> TransportResult<(BoxFrameSink, BoxFrameStream)> {
        let (socket, response) = connect_async(url).await.map_err(|e| TransportError::Dial {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(url = %url, status = %response.status(), "WebSocket connected");

        let (sink, stream) = socket.split();
        Ok((Box::new(WebSocketSink { sink }), Box::new(WebSocketReader { stream })))
    }
}

struct WebSocketSink {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Frame) -> TransportResult<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Close(close) => Message::Close(close.map(|c| WsCloseFrame {
                code: WsCloseCode::from(c.code),
                reason: c.reason.into(),
            })),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct WebSocketReader {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl FrameStream for WebSocketReader {
    async fn recv(&mut self) -> Option<TransportResult<Frame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };

            return Some(match message {
                Message::Text(text) => Ok(Frame::Text(text)),
                Message::Binary(bytes) => String::from_utf8(bytes)
                    .map(Frame::Text)
                    .map_err(|_| TransportError::UnsupportedFrame("binary frame is not UTF-8".to_string())),
                Message::Close(close) => Ok(Frame::Close(
                    close.map(|c| CloseFrame::new(u16::from(c.code), c.reason.into_owned())),
                )),
                // Ping/pong are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            });
        }
    }
}
