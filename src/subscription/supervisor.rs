//! Reconnect Supervisor
//!
//! Runs after a receive loop has ended on a read failure and decides whether
//! streaming resumes on a fresh connection or stops for good.
//!
//! # Reconnection Policy
//!
//! 1. If the subscription is no longer the registered entity for its queue,
//!    stop.
//! 2. Close the stale connection.
//! 3. While the subscription is `Active`, attempt a handshake. On success,
//!    reset the retry count and install the connection. On failure, count
//!    the retry and back off for `min(max, base * retries) + jitter`.
//!
//! Retries are unlimited unless `max_retries` is configured. Unsubscribe
//! interrupts both the backoff sleep and an in-flight handshake.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::handshake::Handshake;
use super::registry::{Registry, Subscription};
use super::transport::Connection;
use crate::config::BackoffConfig;

/// Exponential-then-flat backoff with uniform jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: Duration,
    max_retries: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            max: Duration::from_millis(config.max_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_retries: config.max_retries,
        }
    }

    /// Delay without jitter after `retry_count` consecutive failures.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        self.base.saturating_mul(retry_count).min(self.max)
    }

    /// Delay including a uniformly random jitter in `[0, jitter)`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.base_delay(retry_count).saturating_add(jitter)
    }

    /// Whether `retry_count` failures use up the retry allowance.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        self.max_retries
            .map(|max| retry_count >= max)
            .unwrap_or(false)
    }
}

pub(crate) struct Supervisor<'a> {
    registry: &'a Registry,
    handshake: &'a Handshake,
    backoff: &'a BackoffPolicy,
}

impl<'a> Supervisor<'a> {
    pub(crate) fn new(
        registry: &'a Registry,
        handshake: &'a Handshake,
        backoff: &'a BackoffPolicy,
    ) -> Self {
        Self {
            registry,
            handshake,
            backoff,
        }
    }

    /// Re-establish streaming for `subscription`.
    ///
    /// Returns the new connection, or `None` when the receive loop must not
    /// be restarted.
    pub(crate) async fn reconnect(
        &self,
        subscription: &Arc<Subscription>,
        stale: Connection,
    ) -> Option<Connection> {
        let queue_id = subscription.queue_id();

        if !self.registry.is_current(subscription).await {
            debug!(queue_id = %queue_id, "Subscription no longer registered, not reconnecting");
            stale.close().await;
            return None;
        }

        if let Some(closer) = subscription.take_connection().await {
            closer.close();
        }
        stale.close().await;

        loop {
            if !subscription.is_active().await {
                debug!(queue_id = %queue_id, "Subscription stopping, abandoning reconnect");
                return None;
            }

            let attempt = tokio::select! {
                biased;
                _ = subscription.terminated() => None,
                result = self.handshake.perform(queue_id) => Some(result),
            };

            match attempt {
                None => return None,
                Some(Ok((connection, closer))) => {
                    if subscription.install(closer.clone()).await {
                        subscription.stats().record_reconnect();
                        info!(queue_id = %queue_id, "Reconnected");
                        return Some(connection);
                    }
                    closer.close();
                    connection.close().await;
                    debug!(queue_id = %queue_id, "Stopped during handshake, discarding connection");
                    return None;
                }
                Some(Err(e)) => {
                    let retry = subscription.record_failure().await;

                    if self.backoff.exhausted(retry) {
                        error!(
                            queue_id = %queue_id,
                            retry = retry,
                            error = %e,
                            "Giving up on reconnect"
                        );
                        self.registry.remove_if_current_and_stop(subscription).await;
                        return None;
                    }

                    let delay = self.backoff.delay(retry);
                    warn!(
                        queue_id = %queue_id,
                        retry = retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reconnect failed, backing off"
                    );

                    tokio::select! {
                        biased;
                        _ = subscription.terminated() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
