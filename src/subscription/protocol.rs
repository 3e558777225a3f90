//! Push Stream Wire Protocol
//!
//! Single responsibility: encode the subscribe control frame and decode push
//! frames. All frames are JSON.
//!
//! ## Control frame (client -> server, once per handshake)
//! ```text
//! {
//!     "Action": "ConsumeMsg",
//!     "Data": {
//!         "OrganizationId": <u64>,
//!         "QueueId": <string>,
//!         "ConsumerId": <string>,
//!         "ConsumerToken": <string>
//!     }
//! }
//! ```
//!
//! ## Push frame (server -> client)
//! ```text
//! {
//!     "Action": <string>,
//!     "RetCode": <int>,
//!     "Message": <string>,
//!     "Data": { "MsgId": <string>, "MsgBody": <string> }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ConsumerError, Result};

/// Action name of the subscribe control frame.
pub const CONSUME_ACTION: &str = "ConsumeMsg";

/// Subscription parameters carried in the control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsumeRequest {
    pub organization_id: u64,
    pub queue_id: String,
    pub consumer_id: String,
    pub consumer_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ControlFrame<'a> {
    action: &'static str,
    data: &'a ConsumeRequest,
}

/// A message delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "MsgId")]
    pub message_id: String,

    #[serde(rename = "MsgBody", default)]
    pub body: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    #[serde(default)]
    action: String,
    #[serde(default)]
    ret_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<PushMessage>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A message for the handler.
    Push(PushMessage),
    /// A server notice carrying a non-zero return code.
    Notice {
        action: String,
        ret_code: i64,
        message: String,
    },
}

/// Encode the control frame that starts consumption.
pub fn encode_consume(request: &ConsumeRequest) -> Result<String> {
    let frame = ControlFrame {
        action: CONSUME_ACTION,
        data: request,
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Decode a frame read from the push stream.
pub fn decode_inbound(frame: &[u8]) -> Result<Inbound> {
    let envelope: Envelope = serde_json::from_slice(frame)?;

    if envelope.ret_code != 0 {
        return Ok(Inbound::Notice {
            action: envelope.action,
            ret_code: envelope.ret_code,
            message: envelope.message,
        });
    }

    envelope
        .data
        .map(Inbound::Push)
        .ok_or_else(|| ConsumerError::Protocol("Push frame missing 'Data'".into()))
}
