//! Per-subscription counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated lock-free from the streaming path and the ack router.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    messages_received: AtomicU64,
    decode_errors: AtomicU64,
    acks_sent: AtomicU64,
    acks_failed: AtomicU64,
    handler_failures: AtomicU64,
    reconnects: AtomicU64,
}

/// Public statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub decode_errors: u64,
    pub acks_sent: u64,
    pub acks_failed: u64,
    pub handler_failures: u64,
    pub reconnects: u64,
}

impl SubscriptionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_failed(&self) {
        self.acks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_failed: self.acks_failed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
