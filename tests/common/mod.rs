//! Shared test doubles: an in-memory queue server behind the `Connector`
//! trait, and an `AckClient` that records every call.

#![allow(dead_code)]

use async_trait::async_trait;
use pushline::{
    AckClient, AckSink, BackoffConfig, Connector, Consumer, ConsumerConfig, ConsumerError,
    PushMessage, Result, SubscriptionInfo, Transport,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Frame the mock server sends to confirm a subscription.
pub const ACK_FRAME: &str = r#"{"Action":"ConsumeMsg","RetCode":0,"Message":"ok"}"#;

/// How the mock server answers one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Refuse the connection outright.
    Refuse,
    /// Accept, then hang up before confirming the subscription.
    HangUp,
    /// Accept and confirm.
    Accept,
}

/// Server side of one accepted connection.
///
/// Dropping it closes the connection from the server's end.
pub struct Peer {
    push: mpsc::UnboundedSender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl Peer {
    pub fn push_message(&self, message_id: &str, body: &str) {
        let frame = serde_json::json!({
            "Action": "PushMsg",
            "RetCode": 0,
            "Data": { "MsgId": message_id, "MsgBody": body },
        });
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, frame: &str) {
        let _ = self.push.send(frame.as_bytes().to_vec());
    }

    /// Whether the client has closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    step: Step,
    confirm_pending: bool,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
    control_frames: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.control_frames.lock().unwrap().push(text);
        self.confirm_pending = self.step == Step::Accept;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        if self.step == Step::HangUp {
            return Ok(None);
        }
        if self.confirm_pending {
            self.confirm_pending = false;
            return Ok(Some(ACK_FRAME.as_bytes().to_vec()));
        }
        Ok(self.incoming.recv().await)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Scripted connector. Scripted steps are consumed in order; once they run
/// out, every attempt uses the fallback step.
pub struct MockConnector {
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Step>,
    attempts: AtomicUsize,
    authorizations: Mutex<Vec<String>>,
    control_frames: Arc<Mutex<Vec<String>>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl MockConnector {
    pub fn new(script: &[Step], fallback: Step) -> (Arc<Self>, Peers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            fallback: Mutex::new(fallback),
            attempts: AtomicUsize::new(0),
            authorizations: Mutex::new(Vec::new()),
            control_frames: Arc::new(Mutex::new(Vec::new())),
            peers: tx,
        });
        (connector, Peers { rx })
    }

    pub fn set_fallback(&self, step: Step) {
        *self.fallback.lock().unwrap() = step;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.authorizations.lock().unwrap().clone()
    }

    pub fn control_frames(&self) -> Vec<serde_json::Value> {
        self.control_frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str, authorization: &str) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.authorizations
            .lock()
            .unwrap()
            .push(authorization.to_string());

        let scripted = self.script.lock().unwrap().pop_front();
        let step = scripted.unwrap_or(*self.fallback.lock().unwrap());
        if step == Step::Refuse {
            return Err(ConsumerError::Transport("connection refused".into()));
        }

        let (push, incoming) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        if step == Step::Accept {
            let _ = self.peers.send(Peer {
                push,
                closed: Arc::clone(&closed),
            });
        }

        Ok(Box::new(MockTransport {
            step,
            confirm_pending: false,
            incoming,
            closed,
            control_frames: Arc::clone(&self.control_frames),
        }))
    }
}

/// Connections the mock server has accepted, in order.
pub struct Peers {
    rx: mpsc::UnboundedReceiver<Peer>,
}

impl Peers {
    /// Wait for the next accepted connection.
    pub async fn next(&mut self) -> Peer {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("no connection accepted within 2s")
            .expect("connector dropped")
    }
}

/// `AckClient` that records `(queue_id, message_id)` for every call.
#[derive(Default)]
pub struct RecordingAckClient {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingAckClient {
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AckClient for RecordingAckClient {
    async fn ack(&self, queue_id: &str, message_id: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((queue_id.to_string(), message_id.to_string()));
        Ok(())
    }
}

/// Handler that records message bodies and acknowledges every message.
pub fn recording_handler() -> (
    Arc<Mutex<Vec<String>>>,
    impl Fn(&AckSink, PushMessage) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_handler = Arc::clone(&seen);
    let handler = move |ack: &AckSink, message: PushMessage| {
        seen_in_handler.lock().unwrap().push(message.body.clone());
        ack.submit(message.message_id);
    };
    (seen, handler)
}

/// Consumer config with millisecond-scale backoff.
pub fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        consumer_id: "CID_test".into(),
        consumer_token: "token".into(),
        auth_token: "Bearer test".into(),
        backoff: BackoffConfig {
            base_ms: 10,
            max_ms: 40,
            jitter_ms: 5,
            max_retries: None,
        },
        ..Default::default()
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_for<F: FnMut() -> bool>(what: &str, mut condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Poll the consumer's view of `queue_id` until `condition` holds.
pub async fn wait_for_info<F>(consumer: &Consumer, queue_id: &str, what: &str, condition: F)
where
    F: Fn(Option<&SubscriptionInfo>) -> bool,
{
    for _ in 0..400 {
        if condition(consumer.info(queue_id).await.as_ref()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}
