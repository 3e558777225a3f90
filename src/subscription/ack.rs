//! Ack Router
//!
//! One task per subscription. It owns the receiving end of the `AckSink`
//! handed to the message handler, and the subscription's stop signal.
//!
//! - An acknowledged message id triggers one `AckClient::ack` call. Calls are
//!   issued strictly one at a time, in the order ids were submitted.
//! - An empty id is a handler-reported failure: counted, never sent.
//! - Ack failures are logged and dropped. The push stream never sees them.
//! - The stop signal runs the subscription's terminal teardown and ends the
//!   task.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::Subscription;
use crate::ack_client::AckClient;

/// Where a handler reports processed messages.
///
/// Cheap to clone; handlers that offload work to other tasks can take a
/// clone along. Submitting never blocks.
#[derive(Debug, Clone)]
pub struct AckSink {
    tx: mpsc::UnboundedSender<String>,
}

impl AckSink {
    /// Report `message_id` as processed. An empty id reports a failure.
    pub fn submit(&self, message_id: impl Into<String>) {
        if self.tx.send(message_id.into()).is_err() {
            debug!("Ack router has stopped, dropping acknowledgment");
        }
    }
}

pub(crate) fn ack_channel() -> (AckSink, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AckSink { tx }, rx)
}

pub(crate) struct AckRouter {
    subscription: Arc<Subscription>,
    acks: mpsc::UnboundedReceiver<String>,
    stop: oneshot::Receiver<()>,
    client: Arc<dyn AckClient>,
}

impl AckRouter {
    pub(crate) fn new(
        subscription: Arc<Subscription>,
        acks: mpsc::UnboundedReceiver<String>,
        stop: oneshot::Receiver<()>,
        client: Arc<dyn AckClient>,
    ) -> Self {
        Self {
            subscription,
            acks,
            stop,
            client,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let queue_id = self.subscription.queue_id().to_string();
        let mut sinks_open = true;
        debug!(queue_id = %queue_id, "Ack router started");

        loop {
            tokio::select! {
                biased;
                // A dropped sender means the subscription is gone; tear down too.
                _ = &mut self.stop => {
                    self.subscription.teardown().await;
                    info!(queue_id = %queue_id, "Subscription stopped");
                    break;
                }
                next = self.acks.recv(), if sinks_open => match next {
                    Some(message_id) => {
                        route(&self.subscription, self.client.as_ref(), &queue_id, &message_id)
                            .await
                    }
                    None => sinks_open = false,
                },
            }
        }
    }
}

async fn route(
    subscription: &Subscription,
    client: &dyn AckClient,
    queue_id: &str,
    message_id: &str,
) {
    let stats = subscription.stats();

    if message_id.is_empty() {
        stats.record_handler_failure();
        warn!(queue_id = %queue_id, "Handler reported a failed message");
        return;
    }

    match client.ack(queue_id, message_id).await {
        Ok(()) => {
            stats.record_ack_sent();
            debug!(queue_id = %queue_id, message_id = %message_id, "Ack sent");
        }
        Err(e) => {
            stats.record_ack_failed();
            warn!(
                queue_id = %queue_id,
                message_id = %message_id,
                error = %e,
                "Ack failed, not retrying"
            );
        }
    }
}
