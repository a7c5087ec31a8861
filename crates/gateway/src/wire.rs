//! Wire framing for network subscribers.
//!
//! One event per frame: `event: <kind>\ndata: <JSON>\n\n`. The data object
//! carries the event's kind-specific fields plus its timestamp, with the
//! conversation id stamped in by this boundary — the loop engine never sees
//! transport concerns. A `connected` frame opens every subscription and
//! `heartbeat` frames keep the connection warm.

use serde_json::{Map, Value};

use vitalis_core::conversation::{ConversationId, SubscriberId};
use vitalis_core::event::Envelope;

/// One frame destined for a network subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    /// The SSE event name (the event kind).
    pub event: String,
    /// The JSON payload.
    pub data: String,
}

impl WireFrame {
    /// Frame a bus envelope: kind becomes the event name, the payload gets
    /// `conversationId` stamped onto it.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let mut data = match serde_json::to_value(&envelope.event) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        // The kind travels as the frame's event name, not in the payload.
        data.remove("kind");
        if let Some(id) = &envelope.conversation_id {
            data.insert(
                "conversationId".into(),
                Value::String(id.as_str().to_string()),
            );
        }
        Self {
            event: envelope.event.kind().to_string(),
            data: Value::Object(data).to_string(),
        }
    }

    /// The frame sent when a subscription is established.
    pub fn connected(subscriber_id: &SubscriberId, conversation_id: &ConversationId) -> Self {
        let data = serde_json::json!({
            "subscriberId": subscriber_id.as_str(),
            "conversationId": conversation_id.as_str(),
        });
        Self {
            event: "connected".into(),
            data: data.to_string(),
        }
    }

    /// A heartbeat frame with no semantic payload.
    pub fn heartbeat() -> Self {
        Self {
            event: "heartbeat".into(),
            data: "{}".into(),
        }
    }

    /// The exact bytes written to the socket for this frame.
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}
