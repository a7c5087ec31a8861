//! Turn event system — the typed publish/subscribe channel that carries
//! every event a reasoning turn produces.
//!
//! The loop engine emits [`TurnEvent`]s without knowing which conversation
//! they belong to; a boundary layer wraps each one in an [`Envelope`] that
//! stamps the conversation id before publication. Consumers (state trackers,
//! the stream multiplexer, the persistence buffer) each derive their own
//! views — the bus itself owns no state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::conversation::{ConversationId, MessageId};

/// Execution phase of a tool call, carried on tool-call events and mirrored
/// by the tracker's tool-call records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallPhase {
    Running,
    Completed,
    Failed,
}

impl ToolCallPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolCallPhase::Completed | ToolCallPhase::Failed)
    }
}

/// All events a reasoning turn can emit.
///
/// This is a closed set: every consumer matches exhaustively, so adding a
/// kind is a compile-time-checked change. Events are immutable once
/// published and each carries its own wall-clock timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A reasoning step produced by the model.
    Thinking {
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// The user's message was classified into an intent.
    IntentClassified {
        intent: String,
        user_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call changed phase (running → completed/failed).
    ToolCall {
        id: String,
        name: String,
        phase: ToolCallPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// A chunk of assistant message text.
    ContentDelta {
        message_id: MessageId,
        delta: String,
        timestamp: DateTime<Utc>,
    },

    /// Sources/actions/advisory metadata attached to the current message.
    Metadata {
        entries: serde_json::Map<String, serde_json::Value>,
        timestamp: DateTime<Utc>,
    },

    /// The turn finished successfully.
    Done {
        message_id: MessageId,
        iterations: u32,
        tools_used: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The turn failed; `message` is always user-safe text.
    ErrorOccurred {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl TurnEvent {
    /// Wire event name for this kind (used as the SSE `event:` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::IntentClassified { .. } => "intent",
            Self::ToolCall { .. } => "tool_call",
            Self::ContentDelta { .. } => "content_delta",
            Self::Metadata { .. } => "metadata",
            Self::Done { .. } => "done",
            Self::ErrorOccurred { .. } => "error",
        }
    }

    /// Whether this event ends a turn (triggers a persistence flush).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::ErrorOccurred { .. })
    }
}

/// A published event plus the conversation it belongs to.
///
/// The conversation id is stamped by the boundary that created the envelope,
/// never by the loop engine. `conversation_id: None` should not occur in
/// normal operation; the multiplexer broadcasts such events to all
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub conversation_id: Option<ConversationId>,
    pub event: TurnEvent,
}

impl Envelope {
    /// An envelope stamped with a conversation id.
    pub fn stamped(conversation_id: ConversationId, event: TurnEvent) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            event,
        }
    }
}

/// A broadcast-based event bus for turn events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Publication
/// never blocks; each subscriber observes events in publication order.
/// There is no cross-process fan-out. Construct one bus per process (or per
/// test) and pass it to every component that needs it.
pub struct EventBus {
    sender: broadcast::Sender<Arc<Envelope>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an envelope to all subscribers.
    pub fn publish(&self, envelope: Envelope) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(envelope));
    }

    /// Subscribe to receive all envelopes in publication order.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
