//! Message state tracking.
//!
//! Maintains the per-message view derived from content deltas: accumulated
//! text, the ordered delta list, lifecycle status, and attached metadata.
//! Transitions are validated against
//! [`MessageStatus::can_transition_to`]; `failed` messages can be retried
//! back to `pending`. Messages are evicted by cascade when their
//! conversation is evicted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use vitalis_core::conversation::{ConversationId, MessageId, MessageStatus, Role};
use vitalis_core::event::{Envelope, TurnEvent};

/// The tracked view of one message.
#[derive(Debug, Clone)]
pub struct TrackedMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    /// Text accumulated by delta concatenation in arrival order.
    pub text: String,
    /// The ordered list of received deltas.
    pub deltas: Vec<String>,
    pub status: MessageStatus,
    /// Sources/actions/advisory metadata attached by metadata events.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// Tracks message lifecycles keyed by message id.
pub struct MessageTracker {
    messages: HashMap<MessageId, TrackedMessage>,
    /// The message currently receiving content per conversation, so
    /// metadata and error events can find their target.
    current: HashMap<ConversationId, MessageId>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self {
            messages: HashMap::new(),
            current: HashMap::new(),
        }
    }

    /// Fold one bus envelope into the tracked state.
    pub fn observe(&mut self, envelope: &Envelope) {
        let Some(conversation_id) = envelope.conversation_id.clone() else {
            return;
        };

        match &envelope.event {
            TurnEvent::ContentDelta {
                message_id, delta, ..
            } => {
                let message = self
                    .messages
                    .entry(message_id.clone())
                    .or_insert_with(|| TrackedMessage {
                        id: message_id.clone(),
                        conversation_id: conversation_id.clone(),
                        role: Role::Assistant,
                        text: String::new(),
                        deltas: Vec::new(),
                        status: MessageStatus::Pending,
                        metadata: serde_json::Map::new(),
                        updated_at: Utc::now(),
                    });
                // Deltas concatenate; they never replace.
                message.text.push_str(delta);
                message.deltas.push(delta.clone());
                message.updated_at = Utc::now();
                self.current
                    .insert(conversation_id.clone(), message_id.clone());
                self.transition(message_id, MessageStatus::Sending);
                self.transition(message_id, MessageStatus::Streaming);
            }
            TurnEvent::Metadata { entries, .. } => {
                if let Some(message_id) = self.current.get(&conversation_id).cloned()
                    && let Some(message) = self.messages.get_mut(&message_id)
                {
                    for (key, value) in entries {
                        message.metadata.insert(key.clone(), value.clone());
                    }
                    message.updated_at = Utc::now();
                }
            }
            TurnEvent::Done { message_id, .. } => {
                self.transition(message_id, MessageStatus::Complete);
                self.current.remove(&conversation_id);
            }
            TurnEvent::ErrorOccurred { .. } => {
                if let Some(message_id) = self.current.remove(&conversation_id) {
                    self.transition(&message_id, MessageStatus::Failed);
                }
            }
            TurnEvent::Thinking { .. }
            | TurnEvent::IntentClassified { .. }
            | TurnEvent::ToolCall { .. } => {}
        }
    }

    /// Apply a single status transition if the table allows it.
    ///
    /// A self-transition is a no-op (returns `true`). An illegal transition
    /// is logged and dropped (returns `false`).
    pub fn transition(&mut self, id: &MessageId, to: MessageStatus) -> bool {
        let Some(message) = self.messages.get_mut(id) else {
            return false;
        };
        if message.status == to {
            return true;
        }
        if !message.status.can_transition_to(to) {
            warn!(message = %id, from = ?message.status, to = ?to, "illegal message transition dropped");
            return false;
        }
        debug!(message = %id, from = ?message.status, to = ?to, "message transition");
        message.status = to;
        message.updated_at = Utc::now();
        true
    }

    /// Put a failed message back to `pending` for a retry.
    pub fn retry(&mut self, id: &MessageId) -> bool {
        self.transition(id, MessageStatus::Pending)
    }

    pub fn get(&self, id: &MessageId) -> Option<&TrackedMessage> {
        self.messages.get(id)
    }

    /// The accumulated text for a message.
    pub fn text(&self, id: &MessageId) -> Option<&str> {
        self.messages.get(id).map(|m| m.text.as_str())
    }

    /// Cascade eviction: drop every message owned by the conversation.
    pub fn evict_conversation(&mut self, conversation_id: &ConversationId) {
        self.messages
            .retain(|_, m| &m.conversation_id != conversation_id);
        self.current.remove(conversation_id);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageTracker {
    fn default() -> Self {
        Self::new()
    }
}
