//! Streaming persistence buffer — turns the event stream into exactly-once
//! durable writes.
//!
//! Content deltas are concatenated in arrival order into a per-conversation
//! buffer (the first delta creates the record); metadata events
//! shallow-merge into a per-conversation map. A terminal event triggers a
//! flush: a per-conversation "already flushed" marker makes a duplicate
//! terminal signal a no-op, the buffers are copied out and cleared
//! *before* the asynchronous repository write, and the write happens on a
//! spawned task so the hot path never waits on storage.
//!
//! A storage failure after clearing is logged and lost — the accepted
//! trade-off for never blocking or double-writing. A periodic timer flushes
//! any non-empty buffer through the same guard as a safety net for missed
//! terminal events; it is therefore idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

use vitalis_core::conversation::{ConversationId, Role};
use vitalis_core::event::{Envelope, EventBus, TurnEvent};
use vitalis_core::storage::{ConversationRepository, MessageRepository};

#[derive(Default)]
struct TurnBuffer {
    user_content: Option<String>,
    assistant_content: String,
    metadata: serde_json::Map<String, serde_json::Value>,
    flushed: bool,
}

impl TurnBuffer {
    fn has_content(&self) -> bool {
        self.user_content.is_some()
            || !self.assistant_content.is_empty()
            || !self.metadata.is_empty()
    }

    /// Restart the buffer when a new turn begins after a flush.
    fn reset_if_flushed(&mut self) {
        if self.flushed {
            *self = TurnBuffer::default();
        }
    }
}

/// Accumulates streamed turn content and flushes it to durable storage
/// exactly once per turn.
pub struct PersistenceBuffer {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    buffers: Mutex<HashMap<ConversationId, TurnBuffer>>,
}

impl PersistenceBuffer {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            messages,
            conversations,
            buffers: Mutex::new(HashMap::new()),
        })
    }

    /// Fold one bus envelope into the buffers. Terminal events trigger a
    /// flush; the returned handle (if any) is the spawned write task.
    pub fn observe(self: &Arc<Self>, envelope: &Envelope) -> Option<tokio::task::JoinHandle<()>> {
        let Some(id) = envelope.conversation_id.clone() else {
            // An error without a conversation id has nothing to flush.
            return None;
        };

        match &envelope.event {
            TurnEvent::IntentClassified {
                intent,
                user_message,
                ..
            } => {
                let mut buffers = self.buffers.lock().unwrap();
                let buffer = buffers.entry(id).or_default();
                buffer.reset_if_flushed();
                buffer.user_content = Some(user_message.clone());
                buffer
                    .metadata
                    .insert("intent".into(), serde_json::Value::String(intent.clone()));
                None
            }
            TurnEvent::ContentDelta { delta, .. } => {
                let mut buffers = self.buffers.lock().unwrap();
                let buffer = buffers.entry(id).or_default();
                buffer.reset_if_flushed();
                // Concatenated, never replaced.
                buffer.assistant_content.push_str(delta);
                None
            }
            TurnEvent::Metadata { entries, .. } => {
                let mut buffers = self.buffers.lock().unwrap();
                let buffer = buffers.entry(id).or_default();
                buffer.reset_if_flushed();
                for (key, value) in entries {
                    buffer.metadata.insert(key.clone(), value.clone());
                }
                None
            }
            TurnEvent::Done { .. } | TurnEvent::ErrorOccurred { .. } => self.flush(&id),
            TurnEvent::Thinking { .. } | TurnEvent::ToolCall { .. } => None,
        }
    }

    /// Flush one conversation's buffer to durable storage.
    ///
    /// Synchronously marks the buffer flushed and empties it under the
    /// lock, then writes on a spawned task. A duplicate flush — concurrent
    /// or later — finds the marker set and nothing buffered, and is a
    /// no-op. Returns the write task when a write was started.
    pub fn flush(self: &Arc<Self>, id: &ConversationId) -> Option<tokio::task::JoinHandle<()>> {
        let (user_content, assistant_content, metadata) = {
            let mut buffers = self.buffers.lock().unwrap();
            let buffer = buffers.get_mut(id)?;
            if buffer.flushed || !buffer.has_content() {
                return None;
            }
            buffer.flushed = true;
            (
                buffer.user_content.take(),
                std::mem::take(&mut buffer.assistant_content),
                std::mem::take(&mut buffer.metadata),
            )
        };

        debug!(conversation = %id, "flushing turn buffer");
        let this = self.clone();
        let id = id.clone();
        Some(tokio::spawn(async move {
            if let Some(user_text) = user_content {
                if let Err(e) = this
                    .messages
                    .create_message(
                        &id,
                        Role::User.sender_id(),
                        "text",
                        &user_text,
                        &serde_json::Map::new(),
                    )
                    .await
                {
                    // The buffer was already cleared; this write is lost.
                    error!(conversation = %id, error = %e, "user message write failed after buffer clear");
                }
            }

            if !assistant_content.is_empty() {
                if let Err(e) = this
                    .messages
                    .create_message(
                        &id,
                        Role::Assistant.sender_id(),
                        "text",
                        &assistant_content,
                        &metadata,
                    )
                    .await
                {
                    error!(conversation = %id, error = %e, "assistant message write failed after buffer clear");
                }
            }

            if let Err(e) = this.conversations.update_activity(&id).await {
                error!(conversation = %id, error = %e, "activity update failed");
            }
        }))
    }

    /// Flush every conversation with unflushed content and drop entries
    /// that are flushed and empty. The safety net behind missed terminal
    /// events.
    pub fn flush_all(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let ids: Vec<ConversationId> = {
            let mut buffers = self.buffers.lock().unwrap();
            buffers.retain(|_, b| !b.flushed || b.has_content());
            buffers
                .iter()
                .filter(|(_, b)| !b.flushed && b.has_content())
                .map(|(id, _)| id.clone())
                .collect()
        };
        ids.iter().filter_map(|id| self.flush(id)).collect()
    }

    /// Number of conversations with unflushed buffered content.
    pub fn pending(&self) -> usize {
        self.buffers
            .lock()
            .unwrap()
            .values()
            .filter(|b| !b.flushed && b.has_content())
            .count()
    }

    /// Subscribe to the bus and consume events until it closes, flushing
    /// non-empty buffers on `flush_interval` as a safety net.
    pub fn spawn(
        self: &Arc<Self>,
        bus: &EventBus,
        flush_interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(flush_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(envelope) => {
                            this.observe(&envelope);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "persistence buffer lagged behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = timer.tick() => {
                        this.flush_all();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use vitalis_core::conversation::MessageId;

    fn setup() -> (Arc<InMemoryStore>, Arc<PersistenceBuffer>) {
        let store = Arc::new(InMemoryStore::new());
        let buffer = PersistenceBuffer::new(store.clone(), store.clone());
        (store, buffer)
    }

    fn conv() -> ConversationId {
        ConversationId::from("c1")
    }

    fn intent_event() -> Envelope {
        Envelope::stamped(
            conv(),
            TurnEvent::IntentClassified {
                intent: "symptom_consult".into(),
                user_message: "我头疼".into(),
                timestamp: Utc::now(),
            },
        )
    }

    fn delta_event(text: &str) -> Envelope {
        Envelope::stamped(
            conv(),
            TurnEvent::ContentDelta {
                message_id: MessageId::from("m1"),
                delta: text.into(),
                timestamp: Utc::now(),
            },
        )
    }

    fn done_event() -> Envelope {
        Envelope::stamped(
            conv(),
            TurnEvent::Done {
                message_id: MessageId::from("m1"),
                iterations: 1,
                tools_used: vec!["knowledge_lookup".into()],
                timestamp: Utc::now(),
            },
        )
    }

    async fn settle(handle: Option<tokio::task::JoinHandle<()>>) {
        if let Some(handle) = handle {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn deltas_accumulate_and_flush_on_done() {
        let (store, buffer) = setup();
        buffer.observe(&intent_event());
        buffer.observe(&delta_event("Likely a tension "));
        buffer.observe(&delta_event("headache; rest and hydrate."));
        settle(buffer.observe(&done_event())).await;

        let assistant = store.messages_by_sender(&conv(), "assistant");
        assert_eq!(assistant.len(), 1);
        assert_eq!(
            assistant[0].content,
            "Likely a tension headache; rest and hydrate."
        );
        // The user message persisted alongside.
        let user = store.messages_by_sender(&conv(), "user");
        assert_eq!(user.len(), 1);
        assert_eq!(user[0].content, "我头疼");
        assert!(store.activity_updated(&conv()));
    }

    #[tokio::test]
    async fn duplicate_terminal_events_flush_exactly_once() {
        let (store, buffer) = setup();
        buffer.observe(&intent_event());
        buffer.observe(&delta_event("answer"));
        let first = buffer.observe(&done_event());
        let second = buffer.observe(&done_event());
        assert!(second.is_none(), "second terminal signal must be a no-op");
        settle(first).await;

        assert_eq!(store.messages_by_sender(&conv(), "assistant").len(), 1);
    }

    #[tokio::test]
    async fn metadata_shallow_merges_into_flush() {
        let (store, buffer) = setup();
        buffer.observe(&delta_event("answer"));
        let mut first = serde_json::Map::new();
        first.insert("sources".into(), serde_json::json!(["kb://a"]));
        buffer.observe(&Envelope::stamped(
            conv(),
            TurnEvent::Metadata {
                entries: first,
                timestamp: Utc::now(),
            },
        ));
        let mut second = serde_json::Map::new();
        second.insert("sources".into(), serde_json::json!(["kb://b"]));
        second.insert("advisory".into(), serde_json::json!("see a clinician"));
        buffer.observe(&Envelope::stamped(
            conv(),
            TurnEvent::Metadata {
                entries: second,
                timestamp: Utc::now(),
            },
        ));
        settle(buffer.observe(&done_event())).await;

        let assistant = store.messages_by_sender(&conv(), "assistant");
        // Later entries win a shallow merge.
        assert_eq!(assistant[0].metadata["sources"], serde_json::json!(["kb://b"]));
        assert_eq!(
            assistant[0].metadata["advisory"],
            serde_json::json!("see a clinician")
        );
    }

    #[tokio::test]
    async fn error_event_with_id_flushes() {
        let (store, buffer) = setup();
        buffer.observe(&delta_event("partial answer"));
        let handle = buffer.observe(&Envelope::stamped(
            conv(),
            TurnEvent::ErrorOccurred {
                message: "apology".into(),
                timestamp: Utc::now(),
            },
        ));
        settle(handle).await;
        assert_eq!(store.messages_by_sender(&conv(), "assistant").len(), 1);
    }

    #[tokio::test]
    async fn error_without_id_is_ignored() {
        let (store, buffer) = setup();
        buffer.observe(&delta_event("something"));
        let handle = buffer.observe(&Envelope {
            conversation_id: None,
            event: TurnEvent::ErrorOccurred {
                message: "apology".into(),
                timestamp: Utc::now(),
            },
        });
        assert!(handle.is_none());
        assert_eq!(store.message_count(), 0);
        assert_eq!(buffer.pending(), 1);
    }

    #[tokio::test]
    async fn empty_buffer_does_not_flush() {
        let (store, buffer) = setup();
        let handle = buffer.observe(&done_event());
        assert!(handle.is_none());
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn periodic_flush_is_idempotent_with_terminal_flush() {
        let (store, buffer) = setup();
        buffer.observe(&delta_event("safety net"));

        // The timer fires first…
        for handle in buffer.flush_all() {
            handle.await.unwrap();
        }
        // …then a late terminal event arrives.
        let late = buffer.observe(&done_event());
        assert!(late.is_none());

        assert_eq!(store.messages_by_sender(&conv(), "assistant").len(), 1);
        assert_eq!(store.messages_by_sender(&conv(), "assistant")[0].content, "safety net");
    }

    #[tokio::test]
    async fn next_turn_reuses_the_conversation_buffer() {
        let (store, buffer) = setup();
        buffer.observe(&delta_event("turn one"));
        settle(buffer.observe(&done_event())).await;

        // A new turn on the same conversation starts fresh.
        buffer.observe(&delta_event("turn two"));
        settle(buffer.observe(&done_event())).await;

        let assistant = store.messages_by_sender(&conv(), "assistant");
        assert_eq!(assistant.len(), 2);
        assert_eq!(assistant[0].content, "turn one");
        assert_eq!(assistant[1].content, "turn two");
    }

    #[tokio::test]
    async fn storage_failure_is_logged_and_lost() {
        let (store, buffer) = setup();
        store.set_failing(true);
        buffer.observe(&delta_event("doomed"));
        settle(buffer.observe(&done_event())).await;

        // The write failed and the buffer is already clear: nothing retries.
        assert_eq!(store.message_count(), 0);
        assert_eq!(buffer.pending(), 0);
        let late = buffer.observe(&done_event());
        assert!(late.is_none());
    }

    #[tokio::test]
    async fn spawned_consumer_flushes_from_bus_events() {
        let (store, buffer) = setup();
        let bus = EventBus::new(64);
        let task = buffer.spawn(&bus, std::time::Duration::from_secs(3600));

        bus.publish(intent_event());
        bus.publish(delta_event("from the bus"));
        bus.publish(done_event());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(store.messages_by_sender(&conv(), "assistant").len(), 1);
        task.abort();
    }
}
