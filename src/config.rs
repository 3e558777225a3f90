//! Configuration for pushline

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConsumerError, Result};

/// Reconnect backoff settings.
///
/// The delay before retry `n` is `min(max_ms, base_ms * n)` plus a uniform
/// jitter in `[0, jitter_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,

    #[serde(default = "default_backoff_jitter_ms")]
    pub jitter_ms: u64,

    /// Consecutive failed handshakes before giving up (None = unlimited)
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
            jitter_ms: default_backoff_jitter_ms(),
            max_retries: None,
        }
    }
}

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// WebSocket endpoint the push stream is opened against
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// HTTP endpoint for acknowledgment calls
    #[serde(default = "default_http_url")]
    pub http_url: String,

    #[serde(default)]
    pub organization_id: u64,

    #[serde(default)]
    pub consumer_id: String,

    #[serde(default)]
    pub consumer_token: String,

    /// Value of the Authorization header (omitted when empty)
    #[serde(default)]
    pub auth_token: String,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Wait limit for the subscribe acknowledgment (None = wait forever)
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,

    /// Wait limit for each push frame read (None = wait forever)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,

    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

fn default_ws_url() -> String {
    "ws://localhost:6318/ws".to_string()
}

fn default_http_url() -> String {
    "http://localhost:6318".to_string()
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

fn default_backoff_jitter_ms() -> u64 {
    1000
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            http_url: default_http_url(),
            organization_id: 0,
            consumer_id: String::new(),
            consumer_token: String::new(),
            auth_token: String::new(),
            backoff: BackoffConfig::default(),
            handshake_timeout_ms: None,
            read_timeout_ms: None,
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl ConsumerConfig {
    /// Check that the endpoints and backoff bounds are usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ConsumerError::Config(format!(
                "ws_url must be a ws:// or wss:// URL, got '{}'",
                self.ws_url
            )));
        }
        if !(self.http_url.starts_with("http://") || self.http_url.starts_with("https://")) {
            return Err(ConsumerError::Config(format!(
                "http_url must be an http:// or https:// URL, got '{}'",
                self.http_url
            )));
        }
        if self.backoff.max_ms < self.backoff.base_ms {
            return Err(ConsumerError::Config(format!(
                "backoff.max_ms ({}) is below backoff.base_ms ({})",
                self.backoff.max_ms, self.backoff.base_ms
            )));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Queues to subscribe to on startup
    #[serde(default)]
    pub queues: Vec<String>,
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConsumerError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConsumerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConsumerConfig::default();
        assert_eq!(config.ws_url, "ws://localhost:6318/ws");
        assert_eq!(config.backoff.base_ms, 1000);
        assert_eq!(config.backoff.max_ms, 10_000);
        assert_eq!(config.backoff.jitter_ms, 1000);
        assert_eq!(config.backoff.max_retries, None);
        assert!(config.handshake_timeout().is_none());
        assert!(config.read_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
queues = ["q-1"]

[consumer]
consumer_id = "CID_test"
read_timeout_ms = 30000

[consumer.backoff]
max_retries = 5
"#,
        )
        .unwrap();

        assert_eq!(config.queues, vec!["q-1".to_string()]);
        assert_eq!(config.consumer.consumer_id, "CID_test");
        assert_eq!(config.consumer.read_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.consumer.backoff.max_retries, Some(5));
        assert_eq!(config.consumer.backoff.base_ms, 1000);
        assert_eq!(config.consumer.http_url, "http://localhost:6318");
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let config = ConsumerConfig {
            ws_url: "http://localhost/ws".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConsumerError::Config(_))));

        let config = ConsumerConfig {
            http_url: "ftp://localhost".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConsumerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = ConsumerConfig {
            backoff: BackoffConfig {
                base_ms: 5000,
                max_ms: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
