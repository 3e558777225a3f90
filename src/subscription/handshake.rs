//! Subscription Handshake
//!
//! Single responsibility: turn a queue id into a connection that is ready to
//! stream.
//!
//! # Steps
//! 1. Open a transport to the subscription endpoint (with Authorization)
//! 2. Send the `ConsumeMsg` control frame
//! 3. Read exactly one acknowledgment frame
//!
//! The acknowledgment's contents are not inspected; any non-empty frame
//! confirms the subscription. Nothing is retried here: the caller decides.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::protocol::{encode_consume, ConsumeRequest};
use super::transport::{Connection, ConnectionCloser, Connector, Transport};
use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, Result};

/// Everything needed to (re)open the push stream for any queue.
pub struct Handshake {
    connector: Arc<dyn Connector>,
    url: String,
    authorization: String,
    organization_id: u64,
    consumer_id: String,
    consumer_token: String,
    ack_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl Handshake {
    pub fn new(config: &ConsumerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            url: config.ws_url.clone(),
            authorization: config.auth_token.clone(),
            organization_id: config.organization_id,
            consumer_id: config.consumer_id.clone(),
            consumer_token: config.consumer_token.clone(),
            ack_timeout: config.handshake_timeout(),
            read_timeout: config.read_timeout(),
        }
    }

    /// The control frame payload for `queue_id`.
    pub fn request_for(&self, queue_id: &str) -> ConsumeRequest {
        ConsumeRequest {
            organization_id: self.organization_id,
            queue_id: queue_id.to_string(),
            consumer_id: self.consumer_id.clone(),
            consumer_token: self.consumer_token.clone(),
        }
    }

    /// Open and confirm a subscription for `queue_id`.
    ///
    /// # Errors
    /// `HandshakeFailed` if the transport cannot be opened, the control frame
    /// cannot be encoded or sent, or the acknowledgment read fails, ends the
    /// stream, or yields an empty frame.
    pub async fn perform(&self, queue_id: &str) -> Result<(Connection, ConnectionCloser)> {
        debug!(queue_id = %queue_id, url = %self.url, "Starting handshake");

        let mut transport = self
            .connector
            .connect(&self.url, &self.authorization)
            .await
            .map_err(|e| ConsumerError::HandshakeFailed(format!("open failed: {}", e)))?;

        if let Err(e) = self.subscribe(transport.as_mut(), queue_id).await {
            transport.close().await;
            return Err(e);
        }

        info!(queue_id = %queue_id, "Subscription confirmed by server");
        Ok(Connection::new(transport, self.read_timeout))
    }

    async fn subscribe(&self, transport: &mut dyn Transport, queue_id: &str) -> Result<()> {
        let frame = encode_consume(&self.request_for(queue_id))
            .map_err(|e| ConsumerError::HandshakeFailed(format!("encode failed: {}", e)))?;

        transport
            .send_text(frame)
            .await
            .map_err(|e| ConsumerError::HandshakeFailed(format!("send failed: {}", e)))?;

        let read = match self.ack_timeout {
            Some(limit) => tokio::time::timeout(limit, transport.recv())
                .await
                .map_err(|_| {
                    ConsumerError::HandshakeFailed(format!("no acknowledgment within {:?}", limit))
                })?,
            None => transport.recv().await,
        };

        match read {
            Ok(Some(frame)) if !frame.is_empty() => {
                debug!(queue_id = %queue_id, bytes = frame.len(), "Handshake acknowledged");
                Ok(())
            }
            Ok(Some(_)) => Err(ConsumerError::HandshakeFailed(
                "empty acknowledgment frame".into(),
            )),
            Ok(None) => Err(ConsumerError::HandshakeFailed(
                "connection closed before acknowledgment".into(),
            )),
            Err(e) => Err(ConsumerError::HandshakeFailed(format!(
                "acknowledgment read failed: {}",
                e
            ))),
        }
    }
}
