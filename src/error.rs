//! Error types for pushline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    /// A live subscription already exists for this queue.
    #[error("Already subscribed to queue: {0}")]
    AlreadySubscribed(String),

    /// Opening or confirming the subscription failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The push stream stopped delivering frames.
    #[error("Stream broken: {0}")]
    StreamBroken(String),

    #[error("Acknowledgment failed: {0}")]
    AckFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
