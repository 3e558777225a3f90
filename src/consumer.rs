//! Queue Consumer
//!
//! The public entry point: subscribe a handler to a queue, unsubscribe, and
//! inspect live subscriptions.
//!
//! # Guarantees
//!
//! - At most one subscription per queue id at any time
//! - `subscribe()` returns only once the server has confirmed the
//!   subscription; failures before that are reported to the caller
//! - After that, stream failures are repaired in the background and never
//!   reported, apart from a gap in handler invocations
//! - `unsubscribe()` returns immediately; teardown completes asynchronously
//!
//! # Usage
//!
//! ```ignore
//! let consumer = Consumer::new(config)?;
//!
//! consumer
//!     .subscribe("my-queue", |ack: &AckSink, message: PushMessage| {
//!         println!("{}", message.body);
//!         ack.submit(message.message_id);
//!     })
//!     .await?;
//!
//! // later
//! consumer.unsubscribe("my-queue").await;
//! ```

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ack_client::{AckClient, HttpAckClient};
use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, Result};
use crate::subscription::ack::{ack_channel, AckRouter, AckSink};
use crate::subscription::receiver::{receive_loop, MessageHandler};
use crate::subscription::supervisor::Supervisor;
use crate::subscription::{
    BackoffPolicy, Connection, Connector, Handshake, Registry, Subscription, SubscriptionInfo,
    WsConnector,
};

struct Inner {
    registry: Registry,
    handshake: Handshake,
    backoff: BackoffPolicy,
    ack_client: Arc<dyn AckClient>,
}

/// Owns every subscription created through it, plus the connector and ack
/// client they share.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl Consumer {
    /// Create a consumer with the WebSocket connector and HTTP ack client.
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid.
    pub fn new(config: ConsumerConfig) -> Result<Self> {
        config.validate()?;
        let ack_client = HttpAckClient::new(&config)?;
        Ok(Self::with_parts(
            config,
            Arc::new(WsConnector),
            Arc::new(ack_client),
        ))
    }

    /// Create a consumer with explicit transport and ack implementations.
    pub fn with_parts(
        config: ConsumerConfig,
        connector: Arc<dyn Connector>,
        ack_client: Arc<dyn AckClient>,
    ) -> Self {
        let inner = Inner {
            registry: Registry::new(),
            handshake: Handshake::new(&config, connector),
            backoff: BackoffPolicy::from_config(&config.backoff),
            ack_client,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Subscribe `handler` to `queue_id`.
    ///
    /// Returns once the handshake has completed and streaming has started.
    ///
    /// # Errors
    /// - `AlreadySubscribed` if the queue already has a live subscription
    /// - `HandshakeFailed` if the first handshake fails (nothing is registered)
    pub async fn subscribe<H: MessageHandler>(&self, queue_id: &str, handler: H) -> Result<()> {
        if self.inner.registry.contains(queue_id).await {
            return Err(ConsumerError::AlreadySubscribed(queue_id.to_string()));
        }

        let (connection, closer) = self.inner.handshake.perform(queue_id).await?;

        let (subscription, stop_rx) = Subscription::new(queue_id, closer.clone());
        if !self.inner.registry.insert_if_absent(Arc::clone(&subscription)).await {
            // Lost a race with a concurrent subscribe for the same queue.
            closer.close();
            connection.close().await;
            return Err(ConsumerError::AlreadySubscribed(queue_id.to_string()));
        }

        let (ack_sink, ack_rx) = ack_channel();
        AckRouter::new(
            Arc::clone(&subscription),
            ack_rx,
            stop_rx,
            Arc::clone(&self.inner.ack_client),
        )
        .spawn();

        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        tokio::spawn(run_stream(
            Arc::clone(&self.inner),
            subscription,
            connection,
            ack_sink,
            handler,
        ));

        info!(queue_id = %queue_id, "Subscribed");
        Ok(())
    }

    /// Stop the subscription for `queue_id`. No-op if there is none.
    ///
    /// Returns whether a subscription was stopped.
    pub async fn unsubscribe(&self, queue_id: &str) -> bool {
        let stopped = self.inner.registry.remove_and_stop(queue_id).await;
        if stopped {
            info!(queue_id = %queue_id, "Unsubscribed");
        } else {
            debug!(queue_id = %queue_id, "Unsubscribe for unknown queue ignored");
        }
        stopped
    }

    /// Stop every subscription. Returns how many were stopped.
    pub async fn unsubscribe_all(&self) -> usize {
        let mut stopped = 0;
        for queue_id in self.inner.registry.queue_ids().await {
            if self.unsubscribe(&queue_id).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub async fn is_subscribed(&self, queue_id: &str) -> bool {
        self.inner.registry.contains(queue_id).await
    }

    pub async fn info(&self, queue_id: &str) -> Option<SubscriptionInfo> {
        match self.inner.registry.lookup(queue_id).await {
            Some(subscription) => Some(subscription.info().await),
            None => None,
        }
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos = Vec::new();
        for subscription in self.inner.registry.snapshot().await {
            infos.push(subscription.info().await);
        }
        infos
    }
}

/// The streaming path of one subscription: receive, and on failure hand
/// over to the supervisor, until the supervisor says stop.
async fn run_stream(
    inner: Arc<Inner>,
    subscription: Arc<Subscription>,
    mut connection: Connection,
    ack: AckSink,
    handler: Arc<dyn MessageHandler>,
) {
    let queue_id = subscription.queue_id().to_string();

    loop {
        subscription.set_streaming(true).await;
        let reason = receive_loop(
            &mut connection,
            &queue_id,
            &ack,
            handler.as_ref(),
            subscription.stats(),
        )
        .await;
        subscription.set_streaming(false).await;

        if subscription.is_active().await {
            warn!(queue_id = %queue_id, error = %reason, "Push stream broken, reconnecting");
        } else {
            debug!(queue_id = %queue_id, error = %reason, "Push stream ended");
        }

        let supervisor = Supervisor::new(&inner.registry, &inner.handshake, &inner.backoff);
        match supervisor.reconnect(&subscription, connection).await {
            Some(next) => connection = next,
            None => break,
        }
    }

    debug!(queue_id = %queue_id, "Streaming path finished");
}
