use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{DerivError, DerivResult};
use crate::settings::ClientConfig;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// A duplex text channel to the API server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Complete the handshake with the configured endpoint
    async fn open(&self) -> DerivResult<()>;

    /// Report the connection state without waiting
    fn is_open(&self) -> bool;

    /// Write one complete text frame
    async fn send_text(&self, payload: &str) -> DerivResult<()>;

    /// Wait for the next inbound text frame, up to the configured timeout
    async fn receive_text(&self) -> DerivResult<String>;

    /// Send a close frame if open and release the socket. Closing a closed
    /// connection is a no-op.
    async fn close(&self, code: u16, reason: &str) -> DerivResult<()>;

    /// Open again if the connection was found closed
    async fn reopen(&self) -> DerivResult<()> {
        if self.is_open() {
            return Ok(());
        }

        self.open().await
    }
}

/// A `Connector` over one tokio-tungstenite socket.
///
/// The socket is split so a close frame can be written while a reader is
/// parked on the stream; the reader is woken through the state channel.
pub struct WsConnection {
    pub(crate) url: String,
    pub(crate) timeout: Duration,
    pub(crate) writer: Mutex<Option<WsSink>>,
    pub(crate) reader: Mutex<Option<WsSource>>,
    pub(crate) state: watch::Sender<ConnectionState>,
}

impl WsConnection {
    pub fn new(config: &ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);

        Self {
            url: config.url(),
            timeout: config.timeout(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Drop the write half and mark the connection closed after the peer
    /// went away.
    pub(crate) async fn release_writer(&self) {
        self.writer.lock().await.take();
        self.set_state(ConnectionState::Closed);
    }

    async fn handshake(&self) -> DerivResult<()> {
        if self.is_open() {
            return Ok(());
        }

        self.set_state(ConnectionState::Opening);
        tracing::info!("Connecting Async Client to Deriv Endpoint {}", self.url);

        let stream = match tokio::time::timeout(self.timeout, connect_async(self.url.as_str())).await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(err)) => {
                self.set_state(ConnectionState::Closed);
                tracing::warn!("Error connecting to {}: {}", self.url, err);
                return Err(DerivError::Connection(format!(
                    "handshake with {} failed: {err}",
                    self.url
                )));
            }
            Err(_) => {
                self.set_state(ConnectionState::Closed);
                tracing::warn!("Handshake with {} timed out", self.url);
                return Err(DerivError::Connection(format!(
                    "handshake with {} did not complete within {:?}",
                    self.url, self.timeout
                )));
            }
        };

        let (ws_write, ws_read) = stream.split();
        *self.writer.lock().await = Some(ws_write);
        *self.reader.lock().await = Some(ws_read);

        self.set_state(ConnectionState::Open);
        tracing::info!("Successfully Connected Async Client to Deriv API");

        Ok(())
    }

    async fn shutdown(&self, code: u16, reason: &str) -> DerivResult<()> {
        let previous = self.state.send_replace(ConnectionState::Closing);
        if previous == ConnectionState::Closed {
            self.release_writer().await;
            return Ok(());
        }

        if let Some(mut ws_write) = self.writer.lock().await.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };

            if let Err(err) = ws_write.send(Message::Close(Some(frame))).await {
                tracing::debug!("Close frame not delivered: {}", err);
            }
            if let Err(err) = ws_write.close().await {
                tracing::debug!("Error releasing socket: {}", err);
            }
        }

        self.set_state(ConnectionState::Closed);

        // A reader parked in `receive_text` releases its half on wake-up.
        if let Ok(mut ws_read) = self.reader.try_lock() {
            ws_read.take();
        }

        tracing::info!("Connection to {} closed ({} {})", self.url, code, reason);

        Ok(())
    }
}

#[async_trait]
impl Connector for WsConnection {
    async fn open(&self) -> DerivResult<()> {
        self.handshake().await
    }

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    async fn send_text(&self, payload: &str) -> DerivResult<()> {
        self.write_text(payload).await
    }

    async fn receive_text(&self) -> DerivResult<String> {
        self.read_text().await
    }

    async fn close(&self, code: u16, reason: &str) -> DerivResult<()> {
        self.shutdown(code, reason).await
    }
}
