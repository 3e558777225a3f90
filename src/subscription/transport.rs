//! WebSocket Transport Layer
//!
//! Single responsibility: open a message-framed connection and move frames.
//! No knowledge of the subscribe protocol, acknowledgments, or reconnection.
//!
//! `Connection` pairs one open transport with a close signal. The matching
//! `ConnectionCloser` is what a subscription keeps in its connection slot:
//! closing it fails any read blocked on the connection.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{ConsumerError, Result};

/// Upper bound on waiting for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Type alias for the client WebSocket
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A bidirectional, message-framed channel to the server.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Receive the next data frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Close the connection. Errors are swallowed.
    async fn close(&mut self);
}

/// Opens transports. Owned by whoever creates subscriptions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `url`, sending `authorization` as the
    /// Authorization header when it is non-empty.
    async fn connect(&self, url: &str, authorization: &str) -> Result<Box<dyn Transport>>;
}

/// A connected WebSocket transport.
pub struct WsTransport {
    ws: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| ConsumerError::Transport(format!("Failed to send: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(ConsumerError::Transport(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.ws.close(None)).await {
            Ok(Ok(())) => debug!("WebSocket closed"),
            Ok(Err(e)) => debug!(error = %e, "WebSocket close returned error"),
            Err(_) => debug!("WebSocket close timed out"),
        }
    }
}

/// Default connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, authorization: &str) -> Result<Box<dyn Transport>> {
        debug!(url = %url, "Connecting to WebSocket");

        let mut builder = Request::builder()
            .uri(url)
            .header("Host", extract_host(url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Content-Type", "application/json");
        if !authorization.is_empty() {
            builder = builder.header("Authorization", authorization);
        }
        let request = builder
            .body(())
            .map_err(|e| ConsumerError::Transport(format!("Failed to build request: {}", e)))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| ConsumerError::Transport(format!("WebSocket connect failed: {}", e)))?;

        debug!(url = %url, "WebSocket connected");
        Ok(Box::new(WsTransport { ws }))
    }
}

/// Handle that closes a `Connection` from another task.
#[derive(Debug, Clone)]
pub struct ConnectionCloser {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectionCloser {
    /// Signal the connection to close. Idempotent.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// An open, subscribed connection as used by the receive loop.
pub struct Connection {
    transport: Box<dyn Transport>,
    closed: watch::Receiver<bool>,
    read_timeout: Option<Duration>,
}

impl Connection {
    /// Wrap an open transport, returning it with its close handle.
    ///
    /// Dropping every clone of the returned `ConnectionCloser` counts as a
    /// close: the next `recv()` fails with `StreamBroken`. Keep one alive for
    /// as long as the connection should stream.
    pub fn new(
        transport: Box<dyn Transport>,
        read_timeout: Option<Duration>,
    ) -> (Self, ConnectionCloser) {
        let (tx, rx) = watch::channel(false);
        let conn = Self {
            transport,
            closed: rx,
            read_timeout,
        };
        (conn, ConnectionCloser { tx: Arc::new(tx) })
    }

    /// Block until the next frame arrives.
    ///
    /// Every failure is reported as `StreamBroken`: peer close, transport
    /// error, read timeout, or a local close through the `ConnectionCloser`.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        let read_timeout = self.read_timeout;
        let transport = &mut self.transport;
        let closed = &mut self.closed;

        let outcome = tokio::select! {
            biased;
            _ = wait_closed(closed) => None,
            res = read_frame(transport.as_mut(), read_timeout) => Some(res),
        };

        match outcome {
            None => {
                self.transport.close().await;
                Err(ConsumerError::StreamBroken("connection closed locally".into()))
            }
            Some(Ok(Some(frame))) => Ok(frame),
            Some(Ok(None)) => Err(ConsumerError::StreamBroken(
                "connection closed by server".into(),
            )),
            Some(Err(e)) => Err(ConsumerError::StreamBroken(e.to_string())),
        }
    }

    /// Close the underlying transport.
    pub async fn close(mut self) {
        self.transport.close().await;
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Every closer is gone; nobody can keep this connection alive.
            return;
        }
    }
}

async fn read_frame(
    transport: &mut dyn Transport,
    read_timeout: Option<Duration>,
) -> Result<Option<Vec<u8>>> {
    match read_timeout {
        Some(limit) => tokio::time::timeout(limit, transport.recv())
            .await
            .map_err(|_| ConsumerError::Transport(format!("no frame within {:?}", limit)))?,
        None => transport.recv().await,
    }
}

/// Extract host from URL for Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Never produces a frame.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send_text(&mut self, _text: String) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("ws://localhost:6318/ws"), "localhost:6318");
        assert_eq!(extract_host("wss://queue.example.com/ws"), "queue.example.com");
        assert_eq!(extract_host("invalid"), "localhost");
    }

    #[tokio::test]
    async fn test_closer_unblocks_pending_read() {
        let (mut conn, closer) = Connection::new(Box::new(SilentTransport), None);

        let reader = tokio::spawn(async move { conn.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ConsumerError::StreamBroken(_))));
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn test_close_before_read_fails_immediately() {
        let (mut conn, closer) = Connection::new(Box::new(SilentTransport), None);
        closer.close();
        assert!(matches!(conn.recv().await, Err(ConsumerError::StreamBroken(_))));
    }

    #[tokio::test]
    async fn test_dropping_every_closer_closes_connection() {
        let (mut conn, closer) = Connection::new(Box::new(SilentTransport), None);
        let extra = closer.clone();
        drop(closer);
        assert!(!extra.is_closed());

        drop(extra);
        let result = tokio::time::timeout(Duration::from_secs(1), conn.recv())
            .await
            .unwrap();
        assert!(matches!(result, Err(ConsumerError::StreamBroken(_))));
    }

    #[tokio::test]
    async fn test_read_timeout_breaks_stream() {
        let (mut conn, _closer) =
            Connection::new(Box::new(SilentTransport), Some(Duration::from_millis(30)));
        assert!(matches!(conn.recv().await, Err(ConsumerError::StreamBroken(_))));
    }
}
