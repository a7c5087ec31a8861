//! Durable storage seams.
//!
//! Repositories are external collaborators — this crate defines the traits
//! the persistence buffer writes through. Both operations are assumed
//! idempotent-safe to call even if the conversation row already exists.

use async_trait::async_trait;

use crate::conversation::{ConversationId, MessageId};
use crate::error::StorageError;

/// Writes messages to durable storage.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist one message and return its storage id.
    async fn create_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &str,
        content_type: &str,
        content: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<MessageId, StorageError>;
}

/// Maintains conversation rows in durable storage.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Bump the conversation's last-activity timestamp.
    async fn update_activity(&self, conversation_id: &ConversationId) -> Result<(), StorageError>;
}
