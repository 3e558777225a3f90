//! Subscription State and Registry
//!
//! Two levels of locking:
//!
//! - `Registry` maps queue id to `Subscription` behind one mutex, held only
//!   for lookup/insert/remove and the status change that accompanies removal.
//! - Each `Subscription` keeps its mutable fields (status, connection slot,
//!   retry count, connect time, streaming flag) behind its own mutex, held
//!   only for field swaps. Neither lock is ever held across network I/O.
//!
//! Lock order is always registry before subscription.
//!
//! # Status machine
//!
//! ```text
//! Active ──unsubscribe──▶ Stopping ──ack router teardown──▶ Stopped
//!    └────────────────────────────────────────────────────────┘
//!                    (teardown on a dropped stop signal)
//! ```
//!
//! `Stopped` is terminal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::debug;

use super::transport::ConnectionCloser;
use crate::stats::{StatsSnapshot, SubscriptionStats};

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionStatus {
    /// Streaming or reconnecting is permitted.
    Active,
    /// Unsubscribe requested; teardown pending.
    Stopping,
    /// Connection torn down. Terminal.
    Stopped,
}

/// Point-in-time view of a subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub queue_id: String,
    pub status: SubscriptionStatus,
    /// Whether a receive loop is currently reading from a live connection
    pub streaming: bool,
    pub retry_count: u32,
    pub last_connect_time: DateTime<Utc>,
    pub stats: StatsSnapshot,
}

struct SubscriptionState {
    status: SubscriptionStatus,
    streaming: bool,
    connection: Option<ConnectionCloser>,
    last_connect_time: DateTime<Utc>,
    retry_count: u32,
    stop_tx: Option<oneshot::Sender<()>>,
}

/// One live binding between a handler and a queue's push stream.
///
/// The same entity survives any number of reconnects; only its connection
/// slot is swapped.
pub struct Subscription {
    queue_id: String,
    state: Mutex<SubscriptionState>,
    /// Flipped to `true` once teardown has run.
    terminated: watch::Sender<bool>,
    stats: SubscriptionStats,
}

impl Subscription {
    /// Create an `Active` subscription around a freshly handshaken connection.
    ///
    /// Returns the stop receiver, to be handed to the ack router.
    pub(crate) fn new(
        queue_id: &str,
        connection: ConnectionCloser,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (terminated, _) = watch::channel(false);
        let subscription = Arc::new(Self {
            queue_id: queue_id.to_string(),
            state: Mutex::new(SubscriptionState {
                status: SubscriptionStatus::Active,
                streaming: false,
                connection: Some(connection),
                last_connect_time: Utc::now(),
                retry_count: 0,
                stop_tx: Some(stop_tx),
            }),
            terminated,
            stats: SubscriptionStats::new(),
        });
        (subscription, stop_rx)
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    pub async fn status(&self) -> SubscriptionStatus {
        self.state.lock().await.status
    }

    pub async fn is_active(&self) -> bool {
        self.status().await == SubscriptionStatus::Active
    }

    pub async fn info(&self) -> SubscriptionInfo {
        let state = self.state.lock().await;
        SubscriptionInfo {
            queue_id: self.queue_id.clone(),
            status: state.status,
            streaming: state.streaming,
            retry_count: state.retry_count,
            last_connect_time: state.last_connect_time,
            stats: self.stats.snapshot(),
        }
    }

    pub(crate) async fn set_streaming(&self, streaming: bool) {
        let mut state = self.state.lock().await;
        state.streaming = streaming && state.status == SubscriptionStatus::Active;
    }

    /// Mark `Stopping` and deliver the one-shot stop signal.
    ///
    /// Returns false if the signal was already consumed.
    pub(crate) async fn request_stop(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.status == SubscriptionStatus::Active {
            state.status = SubscriptionStatus::Stopping;
        }
        match state.stop_tx.take() {
            Some(stop_tx) => {
                // The router may already be gone; teardown then already ran.
                let _ = stop_tx.send(());
                true
            }
            None => false,
        }
    }

    /// Terminal transition: `Stopped`, connection closed.
    pub(crate) async fn teardown(&self) {
        {
            let mut state = self.state.lock().await;
            state.status = SubscriptionStatus::Stopped;
            state.streaming = false;
            state.stop_tx = None;
            if let Some(connection) = state.connection.take() {
                connection.close();
            }
        }
        self.terminated.send_replace(true);
        debug!(queue_id = %self.queue_id, "Subscription torn down");
    }

    /// Resolve once teardown has run.
    pub(crate) async fn terminated(&self) {
        let mut rx = self.terminated.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Remove the current connection from the slot.
    pub(crate) async fn take_connection(&self) -> Option<ConnectionCloser> {
        self.state.lock().await.connection.take()
    }

    /// Count one failed reconnect attempt, returning the new count.
    pub(crate) async fn record_failure(&self) -> u32 {
        let mut state = self.state.lock().await;
        state.retry_count = state.retry_count.saturating_add(1);
        state.retry_count
    }

    /// Install a new connection after a successful reconnect.
    ///
    /// Refused (returns false) unless the subscription is still `Active`;
    /// the caller then owns closing the connection.
    pub(crate) async fn install(&self, connection: ConnectionCloser) -> bool {
        let mut state = self.state.lock().await;
        if state.status != SubscriptionStatus::Active {
            return false;
        }
        if let Some(previous) = state.connection.replace(connection) {
            previous.close();
        }
        state.retry_count = 0;
        state.last_connect_time = Utc::now();
        true
    }
}

/// Queue id -> live subscription. At most one entry per queue id.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Arc<Subscription>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, queue_id: &str) -> bool {
        self.entries.lock().await.contains_key(queue_id)
    }

    pub async fn lookup(&self, queue_id: &str) -> Option<Arc<Subscription>> {
        self.entries.lock().await.get(queue_id).cloned()
    }

    /// Insert unless the queue id is taken. Returns whether it was inserted.
    pub async fn insert_if_absent(&self, subscription: Arc<Subscription>) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(subscription.queue_id()) {
            return false;
        }
        entries.insert(subscription.queue_id().to_string(), subscription);
        true
    }

    /// Remove the entry for `queue_id` and signal it to stop.
    ///
    /// Returns false if nothing was registered.
    pub async fn remove_and_stop(&self, queue_id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(queue_id) {
            Some(subscription) => {
                subscription.request_stop().await;
                true
            }
            None => false,
        }
    }

    /// Like `remove_and_stop`, but only if `subscription` is still the
    /// registered entity for its queue id.
    pub async fn remove_if_current_and_stop(&self, subscription: &Arc<Subscription>) -> bool {
        let mut entries = self.entries.lock().await;
        let is_current = entries
            .get(subscription.queue_id())
            .map(|current| Arc::ptr_eq(current, subscription))
            .unwrap_or(false);
        if !is_current {
            return false;
        }
        entries.remove(subscription.queue_id());
        subscription.request_stop().await;
        true
    }

    /// Whether `subscription` is the registered entity for its queue id.
    pub async fn is_current(&self, subscription: &Arc<Subscription>) -> bool {
        self.lookup(subscription.queue_id())
            .await
            .map(|current| Arc::ptr_eq(&current, subscription))
            .unwrap_or(false)
    }

    pub async fn queue_ids(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.entries.lock().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::transport::{Connection, Transport};
    use crate::error::Result;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send_text(&mut self, _text: String) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn close(&mut self) {}
    }

    fn closer() -> ConnectionCloser {
        Connection::new(Box::new(NullTransport), None).1
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_exclusive() {
        let registry = Registry::new();
        let (first, _stop1) = Subscription::new("Q1", closer());
        let (second, _stop2) = Subscription::new("Q1", closer());

        assert!(registry.insert_if_absent(Arc::clone(&first)).await);
        assert!(!registry.insert_if_absent(second).await);

        let current = registry.lookup("Q1").await.unwrap();
        assert!(Arc::ptr_eq(&current, &first));
        assert!(registry.is_current(&first).await);
    }

    #[tokio::test]
    async fn test_remove_and_stop_delivers_signal_once() {
        let registry = Registry::new();
        let (sub, stop_rx) = Subscription::new("Q1", closer());
        registry.insert_if_absent(Arc::clone(&sub)).await;

        assert!(registry.remove_and_stop("Q1").await);
        assert_eq!(sub.status().await, SubscriptionStatus::Stopping);
        assert!(stop_rx.await.is_ok());

        assert!(!registry.remove_and_stop("Q1").await);
        assert!(!sub.request_stop().await);
        assert!(!registry.contains("Q1").await);
    }

    #[tokio::test]
    async fn test_teardown_closes_connection_and_is_terminal() {
        let conn_closer = closer();
        let (sub, _stop) = Subscription::new("Q1", conn_closer.clone());

        sub.teardown().await;

        assert!(conn_closer.is_closed());
        assert_eq!(sub.status().await, SubscriptionStatus::Stopped);
        assert!(!sub.install(closer()).await);
        tokio::time::timeout(std::time::Duration::from_secs(1), sub.terminated())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_install_resets_retry_count() {
        let (sub, _stop) = Subscription::new("Q1", closer());
        assert_eq!(sub.record_failure().await, 1);
        assert_eq!(sub.record_failure().await, 2);

        let old = sub.take_connection().await.unwrap();
        assert!(sub.install(closer()).await);
        assert!(!old.is_closed());

        let info = sub.info().await;
        assert_eq!(info.retry_count, 0);
        assert_eq!(info.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_remove_if_current_ignores_replaced_entity() {
        let registry = Registry::new();
        let (old, _stop_old) = Subscription::new("Q1", closer());
        registry.insert_if_absent(Arc::clone(&old)).await;
        registry.remove_and_stop("Q1").await;

        let (new, _stop_new) = Subscription::new("Q1", closer());
        registry.insert_if_absent(Arc::clone(&new)).await;

        assert!(!registry.remove_if_current_and_stop(&old).await);
        assert!(registry.contains("Q1").await);
        assert!(registry.remove_if_current_and_stop(&new).await);
        assert!(!registry.contains("Q1").await);
    }
}
