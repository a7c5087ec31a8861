//! In-memory repository — the storage double for tests and local runs.
//!
//! Production deployments implement the repository traits against their own
//! durable store; this one keeps everything in process memory and offers
//! inspection helpers plus a failure switch for exercising the
//! persistence-fatal path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use vitalis_core::conversation::{ConversationId, MessageId};
use vitalis_core::error::StorageError;
use vitalis_core::storage::{ConversationRepository, MessageRepository};

/// A message row as stored.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: String,
    pub content_type: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// In-memory implementation of both repository traits.
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<Vec<StoredMessage>>,
    activity: Mutex<HashMap<ConversationId, DateTime<Utc>>>,
    failing: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail, to exercise persistence-failure handling.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    /// All messages of a conversation, in insertion order.
    pub fn messages_for(&self, conversation_id: &ConversationId) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Messages of a conversation from one sender, in insertion order.
    pub fn messages_by_sender(
        &self,
        conversation_id: &ConversationId,
        sender_id: &str,
    ) -> Vec<StoredMessage> {
        self.messages_for(conversation_id)
            .into_iter()
            .filter(|m| m.sender_id == sender_id)
            .collect()
    }

    /// Whether `update_activity` has been called for the conversation.
    pub fn activity_updated(&self, conversation_id: &ConversationId) -> bool {
        self.activity.lock().unwrap().contains_key(conversation_id)
    }

    fn check_failing(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn create_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &str,
        content_type: &str,
        content: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<MessageId, StorageError> {
        self.check_failing()?;
        let id = MessageId::new();
        self.messages.lock().unwrap().push(StoredMessage {
            id: id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.to_string(),
            content_type: content_type.to_string(),
            content: content.to_string(),
            metadata: metadata.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn update_activity(&self, conversation_id: &ConversationId) -> Result<(), StorageError> {
        self.check_failing()?;
        self.activity
            .lock()
            .unwrap()
            .insert(conversation_id.clone(), Utc::now());
        Ok(())
    }
}
