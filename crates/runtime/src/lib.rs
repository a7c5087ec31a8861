//! # Vitalis Runtime
//!
//! Bus consumers that own derived state: the conversation/message state
//! trackers (with garbage-collected tool-call records) and the streaming
//! persistence buffer that turns the event stream into exactly-once durable
//! writes. Also provides [`store::InMemoryStore`], the repository double
//! used by tests and local development.
//!
//! None of these components is the source of truth for another; they
//! coordinate exclusively through published events.

pub mod conversation;
pub mod message;
pub mod persist;
pub mod store;
pub mod tracker;

pub use conversation::{ConversationTracker, ToolCallRecord, TrackedConversation};
pub use message::{MessageTracker, TrackedMessage};
pub use persist::PersistenceBuffer;
pub use store::InMemoryStore;
pub use tracker::StateTracker;
