//! Acknowledgment RPC
//!
//! Acknowledgments travel out-of-band as plain HTTP requests, never on the
//! push stream. One call acknowledges one message.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, Result};

/// Issues acknowledgment calls against the queue service.
#[async_trait]
pub trait AckClient: Send + Sync {
    /// Acknowledge `message_id` on `queue_id`.
    async fn ack(&self, queue_id: &str, message_id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AckResponse {
    #[serde(default)]
    ret_code: i64,
    #[serde(default)]
    message: String,
}

/// `AckClient` speaking the queue service's query-string HTTP API.
pub struct HttpAckClient {
    http_client: reqwest::Client,
    url: String,
    consumer_id: String,
    consumer_token: String,
    authorization: String,
}

impl HttpAckClient {
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.ack_timeout())
            .build()
            .map_err(|e| ConsumerError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            url: config.http_url.clone(),
            consumer_id: config.consumer_id.clone(),
            consumer_token: config.consumer_token.clone(),
            authorization: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl AckClient for HttpAckClient {
    async fn ack(&self, queue_id: &str, message_id: &str) -> Result<()> {
        let mut request = self.http_client.get(&self.url).query(&[
            ("Action", "AckMsg"),
            ("QueueId", queue_id),
            ("ConsumerId", self.consumer_id.as_str()),
            ("ConsumerToken", self.consumer_token.as_str()),
            ("MsgId", message_id),
        ]);
        if !self.authorization.is_empty() {
            request = request.header(reqwest::header::AUTHORIZATION, &self.authorization);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConsumerError::AckFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsumerError::AckFailed(format!("HTTP {}", status)));
        }

        let body: AckResponse = response
            .json()
            .await
            .map_err(|e| ConsumerError::AckFailed(format!("invalid response: {}", e)))?;

        if body.ret_code != 0 {
            return Err(ConsumerError::AckFailed(format!(
                "RetCode {}: {}",
                body.ret_code, body.message
            )));
        }

        debug!(queue_id = %queue_id, message_id = %message_id, "Message acknowledged");
        Ok(())
    }
}
