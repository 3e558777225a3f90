//! Receive Loop
//!
//! Reads frames from one connection and hands each push message to the
//! handler together with the subscription's `AckSink`.
//!
//! Frames that fail to decode are counted and skipped. A panicking handler
//! is counted as a handler failure and the loop moves on to the next frame.
//! The loop ends only when the connection read fails; that error is returned
//! so the caller can start reconnection.

use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

use super::ack::AckSink;
use super::protocol::{decode_inbound, Inbound, PushMessage};
use super::transport::Connection;
use crate::error::ConsumerError;
use crate::stats::SubscriptionStats;

/// Caller-supplied processing for push messages.
///
/// Invoked sequentially for one subscription, so it should return quickly:
/// the next frame is not read until it does. Long work belongs on a spawned
/// task holding a clone of the `AckSink`. Handlers of different subscriptions
/// run concurrently.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, ack: &AckSink, message: PushMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&AckSink, PushMessage) + Send + Sync + 'static,
{
    fn handle(&self, ack: &AckSink, message: PushMessage) {
        self(ack, message)
    }
}

/// Run until the connection read fails, returning that failure.
pub(crate) async fn receive_loop(
    connection: &mut Connection,
    queue_id: &str,
    ack: &AckSink,
    handler: &dyn MessageHandler,
    stats: &SubscriptionStats,
) -> ConsumerError {
    loop {
        let frame = match connection.recv().await {
            Ok(frame) => frame,
            Err(e) => return e,
        };

        match decode_inbound(&frame) {
            Ok(Inbound::Push(message)) => {
                stats.record_message();
                debug!(
                    queue_id = %queue_id,
                    message_id = %message.message_id,
                    "Push message received"
                );
                let message_id = message.message_id.clone();
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| handler.handle(ack, message)));
                if outcome.is_err() {
                    stats.record_handler_failure();
                    warn!(
                        queue_id = %queue_id,
                        message_id = %message_id,
                        "Handler panicked, message left unacknowledged"
                    );
                }
            }
            Ok(Inbound::Notice {
                action,
                ret_code,
                message,
            }) => {
                warn!(
                    queue_id = %queue_id,
                    action = %action,
                    ret_code = ret_code,
                    message = %message,
                    "Server notice on push stream"
                );
            }
            Err(e) => {
                stats.record_decode_error();
                warn!(queue_id = %queue_id, error = %e, "Dropping undecodable frame");
            }
        }
    }
}
