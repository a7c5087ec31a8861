//! Conversation and message domain types.
//!
//! These are the value objects shared by every component that keys derived
//! state by conversation or message id: the state trackers, the stream
//! multiplexer, and the persistence buffer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn from(s: &str) -> Self {
                Self(s.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Unique identifier for a conversation (session).
    ConversationId
}

string_id! {
    /// Unique identifier for a message within a conversation.
    MessageId
}

string_id! {
    /// Unique identifier for a live stream subscriber.
    SubscriberId
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

impl Role {
    /// The sender id recorded in durable storage for this role.
    pub fn sender_id(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Lifecycle status of a conversation.
///
/// The conversation tracker enforces the transition table in
/// [`ConversationStatus::can_transition_to`]; an illegal transition is
/// dropped and the previous state remains authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Idle,
    Sending,
    Processing,
    Streaming,
    Complete,
    Error,
    Closed,
}

impl ConversationStatus {
    /// Whether moving from `self` to `to` is a legal lifecycle transition.
    ///
    /// `Closed` is terminal. Every non-terminal state may close.
    pub fn can_transition_to(self, to: ConversationStatus) -> bool {
        use ConversationStatus::*;
        match self {
            Idle => matches!(to, Sending | Closed),
            Sending => matches!(to, Processing | Error | Closed),
            Processing => matches!(to, Streaming | Error | Closed),
            Streaming => matches!(to, Complete | Error | Closed),
            Complete => matches!(to, Idle | Closed),
            Error => matches!(to, Idle | Closed),
            Closed => false,
        }
    }

    /// A conversation in `Complete` or `Closed` is eligible for timed
    /// eviction by the tracker's garbage collector.
    pub fn is_settled(self) -> bool {
        matches!(self, ConversationStatus::Complete | ConversationStatus::Closed)
    }
}

/// Lifecycle status of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sending,
    Streaming,
    Complete,
    Failed,
}

impl MessageStatus {
    /// Whether moving from `self` to `to` is a legal lifecycle transition.
    ///
    /// `Failed` is reachable from `Sending`/`Streaming` and is retryable
    /// back to `Pending`.
    pub fn can_transition_to(self, to: MessageStatus) -> bool {
        use MessageStatus::*;
        match self {
            Pending => matches!(to, Sending),
            Sending => matches!(to, Streaming | Failed),
            Streaming => matches!(to, Complete | Failed),
            Complete => false,
            Failed => matches!(to, Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_ids_are_unique() {
        assert_ne!(ConversationId::new(), ConversationId::new());
    }

    #[test]
    fn id_display_roundtrip() {
        let id = ConversationId::from("conv-1");
        assert_eq!(id.to_string(), "conv-1");
        assert_eq!(id.as_str(), "conv-1");
    }

    #[test]
    fn closed_is_terminal() {
        use ConversationStatus::*;
        for to in [Idle, Sending, Processing, Streaming, Complete, Error, Closed] {
            assert!(!Closed.can_transition_to(to));
        }
    }

    #[test]
    fn every_live_state_can_close() {
        use ConversationStatus::*;
        for from in [Idle, Sending, Processing, Streaming, Complete, Error] {
            assert!(from.can_transition_to(Closed));
        }
    }

    #[test]
    fn happy_path_transitions() {
        use ConversationStatus::*;
        assert!(Idle.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Complete));
        assert!(Complete.can_transition_to(Idle));
    }

    #[test]
    fn illegal_conversation_transitions_rejected() {
        use ConversationStatus::*;
        assert!(!Idle.can_transition_to(Streaming));
        assert!(!Sending.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Streaming));
    }

    #[test]
    fn message_failure_is_retryable() {
        use MessageStatus::*;
        assert!(Sending.can_transition_to(Failed));
        assert!(Streaming.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Complete));
    }

    #[test]
    fn role_sender_ids() {
        assert_eq!(Role::User.sender_id(), "user");
        assert_eq!(Role::Assistant.sender_id(), "assistant");
    }
}
