use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use super::compression::Inflater;
use super::constants::RESUMABLE_CLOSE_CODE;
use super::error::{GatewayError, GatewayResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;
type WsReader = SplitStream<WsStream>;

/// Transport used by the supervisor. One instance carries at most one socket at a time.
#[async_trait]
pub trait GatewayConnection: Send {
    /// Opens a socket, closing any previous one first.
    async fn connect(&mut self, url: &Url) -> GatewayResult<()>;

    /// Closes the socket with `code`. A no-op when nothing is open.
    async fn disconnect(&mut self, code: u16) -> GatewayResult<()>;

    async fn send(&mut self, frame: String) -> GatewayResult<()>;

    /// Next complete text frame. Peer closure surfaces as `GatewayError::ConnectionClosed`.
    async fn receive(&mut self) -> GatewayResult<Bytes>;

    fn is_connected(&self) -> bool;
}

/// Builds a fresh transport for each gateway run.
pub type ConnectionFactory = std::sync::Arc<dyn Fn() -> Box<dyn GatewayConnection> + Send + Sync>;

pub struct WebSocketConnection {
    writer: Option<WsWriter>,
    reader: Option<WsReader>,
    inflater: Inflater,
}

impl WebSocketConnection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            writer: None,
            reader: None,
            inflater: Inflater::new(),
        }
    }

    fn mark_closed(&mut self) {
        self.writer = None;
        self.reader = None;
    }
}

impl Default for WebSocketConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayConnection for WebSocketConnection {
    async fn connect(&mut self, url: &Url) -> GatewayResult<()> {
        if self.writer.is_some() {
            self.disconnect(RESUMABLE_CLOSE_CODE).await?;
        }

        // Bounded by the caller's connect timeout.
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| GatewayError::connection_failed(e.to_string()))?;

        let (writer, reader) = ws_stream.split();
        self.writer = Some(writer);
        self.reader = Some(reader);
        self.inflater.reset();

        debug!(host = url.host_str().unwrap_or_default(), "WebSocket connected");
        Ok(())
    }

    async fn disconnect(&mut self, code: u16) -> GatewayResult<()> {
        if let Some(mut writer) = self.writer.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            };
            let _ = writer.send(WsMessage::Close(Some(frame))).await;
            let _ = writer.close().await;
            debug!(code, "WebSocket connection closed");
        }
        self.reader = None;
        self.inflater.reset();
        Ok(())
    }

    async fn send(&mut self, frame: String) -> GatewayResult<()> {
        let writer = self.writer.as_mut().ok_or(GatewayError::NotConnected)?;

        if let Err(e) = writer.send(WsMessage::Text(frame.into())).await {
            self.mark_closed();
            return Err(GatewayError::websocket(e.to_string()));
        }

        Ok(())
    }

    async fn receive(&mut self) -> GatewayResult<Bytes> {
        let reader = self.reader.as_mut().ok_or(GatewayError::NotConnected)?;

        loop {
            match reader.next().await {
                Some(Ok(WsMessage::Binary(data))) => {
                    if let Some(message) = self.inflater.push(&data)? {
                        return Ok(message);
                    }
                    trace!(len = data.len(), "Buffered partial compressed frame");
                }
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Bytes::copy_from_slice(text.as_bytes()));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (None, String::new()),
                        |f| (Some(u16::from(f.code)), f.reason.as_str().to_string()),
                    );
                    self.mark_closed();
                    return Err(GatewayError::closed(code, reason));
                }
                // tungstenite queues the Pong reply itself.
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(GatewayError::websocket(e.to_string()));
                }
                None => {
                    self.mark_closed();
                    return Err(GatewayError::closed(None, "stream ended"));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}
