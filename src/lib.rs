//! Pushline - long-lived push subscriptions against a remote queue service
//!
//! A consumer subscribes handlers to queue ids. Each subscription opens a
//! WebSocket push stream, delivers every pushed message to its handler, and
//! acknowledges processed messages over a separate HTTP call.
//!
//! ## Architecture
//!
//! - **Consumer**: public entry point, owns the subscription registry
//! - **Subscription engine**: handshake, receive loop, ack router and
//!   reconnect supervisor (see [`subscription`])
//! - **Ack client**: out-of-band acknowledgment RPC
//!
//! ## Failure Model
//!
//! | Failure                         | Outcome                                  |
//! |---------------------------------|------------------------------------------|
//! | First handshake fails           | `subscribe()` returns `HandshakeFailed`  |
//! | Push stream breaks              | Reconnect with backoff, caller not told  |
//! | Ack call fails                  | Logged, not retried, server redelivers   |
//! | Unsubscribe during reconnect    | Reconnect abandoned, nothing reinstalled |

pub mod ack_client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod stats;
pub mod subscription;

pub use ack_client::{AckClient, HttpAckClient};
pub use config::{BackoffConfig, Config, ConsumerConfig};
pub use consumer::Consumer;
pub use error::{ConsumerError, Result};
pub use stats::{StatsSnapshot, SubscriptionStats};
pub use subscription::{
    AckSink, Connector, MessageHandler, PushMessage, SubscriptionInfo, SubscriptionStatus,
    Transport,
};
