//! Conversation state tracking.
//!
//! Consumes bus events and maintains the authoritative in-memory view of
//! each conversation: lifecycle status, last message id, and the set of
//! active tool calls. Transitions are validated against the table in
//! [`ConversationStatus::can_transition_to`]; an illegal transition is
//! logged and dropped, leaving the previous state authoritative.
//!
//! Tool-call records and completed conversations are garbage-collected
//! after fixed grace windows — short for tool records (late UI reads still
//! see the final phase), long for conversations (post-hoc lookups).
//! Eviction never affects the persistence buffer, which flushes
//! independently and earlier.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use vitalis_core::conversation::{ConversationId, ConversationStatus, MessageId};
use vitalis_core::event::{Envelope, ToolCallPhase, TurnEvent};

/// The tracked view of one conversation.
#[derive(Debug, Clone)]
pub struct TrackedConversation {
    pub id: ConversationId,
    pub status: ConversationStatus,
    pub last_message_id: Option<MessageId>,
    pub active_tool_calls: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the conversation settles; cleared if it becomes active again.
    evict_at: Option<DateTime<Utc>>,
}

/// The tracked view of one tool call.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub phase: ToolCallPhase,
    pub input: Option<serde_json::Value>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    evict_at: Option<DateTime<Utc>>,
}

/// Tracks conversation lifecycles and their tool-call records.
pub struct ConversationTracker {
    conversations: HashMap<ConversationId, TrackedConversation>,
    tool_calls: HashMap<ConversationId, HashMap<String, ToolCallRecord>>,
    tool_record_grace: Duration,
    conversation_grace: Duration,
}

impl ConversationTracker {
    pub fn new(tool_record_grace: Duration, conversation_grace: Duration) -> Self {
        Self {
            conversations: HashMap::new(),
            tool_calls: HashMap::new(),
            tool_record_grace,
            conversation_grace,
        }
    }

    /// Fold one bus envelope into the tracked state. Envelopes without a
    /// conversation id carry nothing this tracker can key on.
    pub fn observe(&mut self, envelope: &Envelope) {
        let Some(id) = envelope.conversation_id.clone() else {
            return;
        };
        self.ensure(&id);

        match &envelope.event {
            TurnEvent::IntentClassified { .. } | TurnEvent::Thinking { .. } => {
                self.transition(&id, ConversationStatus::Sending);
                self.transition(&id, ConversationStatus::Processing);
            }
            TurnEvent::ToolCall {
                id: call_id,
                name,
                phase,
                input,
                output,
                error,
                duration_ms,
                ..
            } => {
                self.transition(&id, ConversationStatus::Sending);
                self.transition(&id, ConversationStatus::Processing);
                self.record_tool_call(
                    &id,
                    call_id,
                    name,
                    *phase,
                    input.clone(),
                    output.clone(),
                    error.clone(),
                    *duration_ms,
                );
            }
            TurnEvent::ContentDelta { message_id, .. } => {
                self.transition(&id, ConversationStatus::Streaming);
                if let Some(conv) = self.conversations.get_mut(&id) {
                    conv.last_message_id = Some(message_id.clone());
                }
            }
            TurnEvent::Metadata { .. } => {
                if let Some(conv) = self.conversations.get_mut(&id) {
                    conv.updated_at = Utc::now();
                }
            }
            TurnEvent::Done { .. } => {
                // Derive the intermediate state for turns whose answer
                // produced no deltas.
                self.transition(&id, ConversationStatus::Streaming);
                self.transition(&id, ConversationStatus::Complete);
            }
            TurnEvent::ErrorOccurred { .. } => {
                self.transition(&id, ConversationStatus::Error);
            }
        }
    }

    /// Apply a single status transition if the table allows it.
    ///
    /// A self-transition is a no-op (returns `true`). An illegal transition
    /// is logged and dropped (returns `false`) — the recorded state is
    /// unchanged.
    pub fn transition(&mut self, id: &ConversationId, to: ConversationStatus) -> bool {
        let Some(conv) = self.conversations.get_mut(id) else {
            return false;
        };
        if conv.status == to {
            return true;
        }
        if !conv.status.can_transition_to(to) {
            warn!(conversation = %id, from = ?conv.status, to = ?to, "illegal conversation transition dropped");
            return false;
        }
        debug!(conversation = %id, from = ?conv.status, to = ?to, "conversation transition");
        conv.status = to;
        let now = Utc::now();
        conv.updated_at = now;
        conv.evict_at = if to.is_settled() || to == ConversationStatus::Error {
            Some(now + self.conversation_grace)
        } else {
            None
        };
        true
    }

    /// Current status, if the conversation is tracked.
    pub fn status(&self, id: &ConversationId) -> Option<ConversationStatus> {
        self.conversations.get(id).map(|c| c.status)
    }

    pub fn get(&self, id: &ConversationId) -> Option<&TrackedConversation> {
        self.conversations.get(id)
    }

    /// Tool-call records still in the running phase.
    pub fn active_tool_calls(&self, id: &ConversationId) -> Vec<&ToolCallRecord> {
        let Some(conv) = self.conversations.get(id) else {
            return Vec::new();
        };
        let Some(records) = self.tool_calls.get(id) else {
            return Vec::new();
        };
        conv.active_tool_calls
            .iter()
            .filter_map(|call_id| records.get(call_id))
            .collect()
    }

    /// Any tool-call record, including terminal ones within their grace
    /// window.
    pub fn tool_call(&self, id: &ConversationId, call_id: &str) -> Option<&ToolCallRecord> {
        self.tool_calls.get(id)?.get(call_id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Remove tool records and settled conversations whose grace window has
    /// passed. Returns the evicted conversation ids so owners of cascading
    /// state (the message tracker) can follow suit.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<ConversationId> {
        for records in self.tool_calls.values_mut() {
            records.retain(|_, r| r.evict_at.is_none_or(|at| at > now));
        }
        self.tool_calls.retain(|_, records| !records.is_empty());

        let evicted: Vec<ConversationId> = self
            .conversations
            .iter()
            .filter(|(_, c)| c.evict_at.is_some_and(|at| at <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &evicted {
            debug!(conversation = %id, "evicting settled conversation");
            self.conversations.remove(id);
            self.tool_calls.remove(id);
        }
        evicted
    }

    fn ensure(&mut self, id: &ConversationId) {
        self.conversations.entry(id.clone()).or_insert_with(|| {
            let now = Utc::now();
            TrackedConversation {
                id: id.clone(),
                status: ConversationStatus::Idle,
                last_message_id: None,
                active_tool_calls: HashSet::new(),
                created_at: now,
                updated_at: now,
                evict_at: None,
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn record_tool_call(
        &mut self,
        id: &ConversationId,
        call_id: &str,
        name: &str,
        phase: ToolCallPhase,
        input: Option<serde_json::Value>,
        output: Option<String>,
        error: Option<String>,
        duration_ms: Option<u64>,
    ) {
        let records = self.tool_calls.entry(id.clone()).or_default();
        let record = records
            .entry(call_id.to_string())
            .or_insert_with(|| ToolCallRecord {
                id: call_id.to_string(),
                name: name.to_string(),
                phase,
                input: None,
                output: None,
                error: None,
                duration_ms: None,
                evict_at: None,
            });
        record.phase = phase;
        if input.is_some() {
            record.input = input;
        }
        if output.is_some() {
            record.output = output;
        }
        if error.is_some() {
            record.error = error;
        }
        if duration_ms.is_some() {
            record.duration_ms = duration_ms;
        }
        record.evict_at = phase
            .is_terminal()
            .then(|| Utc::now() + self.tool_record_grace);

        if let Some(conv) = self.conversations.get_mut(id) {
            if phase.is_terminal() {
                conv.active_tool_calls.remove(call_id);
            } else {
                conv.active_tool_calls.insert(call_id.to_string());
            }
            conv.updated_at = Utc::now();
        }
    }
}
