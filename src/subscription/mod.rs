//! Subscription Lifecycle Engine
//!
//! Keeps a server-push subscription alive across network failures.
//!
//! # Architecture
//!
//! Each submodule has a single responsibility:
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `transport`  | Framed connection, connector, close handle            |
//! | `protocol`   | `ConsumeMsg` control frame, push envelope decoding     |
//! | `handshake`  | Open + subscribe + wait for one acknowledgment        |
//! | `receiver`   | Receive loop, `MessageHandler` contract               |
//! | `ack`        | `AckSink`, per-subscription ack router and teardown   |
//! | `supervisor` | Backoff policy and reconnection                       |
//! | `registry`   | `Subscription` state and the queue-id registry         |
//!
//! # Control Flow
//!
//! ```text
//! subscribe ─▶ handshake ─▶ spawn ack router ─▶ receive loop ◀──────┐
//!                                                  │ read fails      │ connected
//!                                                  ▼                 │
//!                                             supervisor ────────────┘
//!                                                  │ not active
//!                                                  ▼
//!                                                 exit
//!
//! unsubscribe ─▶ stop signal ─▶ ack router closes connection ─▶ Stopped
//! ```
//!
//! Per subscription there is exactly one streaming path (receive loop and
//! supervisor, strictly sequential) and one ack router. Subscriptions share
//! nothing but the registry.

pub mod ack;
pub mod handshake;
pub mod protocol;
pub mod receiver;
pub mod registry;
pub mod supervisor;
pub mod transport;

pub use ack::AckSink;
pub use handshake::Handshake;
pub use protocol::{ConsumeRequest, PushMessage};
pub use receiver::MessageHandler;
pub use registry::{Registry, Subscription, SubscriptionInfo, SubscriptionStatus};
pub use supervisor::BackoffPolicy;
pub use transport::{Connection, ConnectionCloser, Connector, Transport, WsConnector};
