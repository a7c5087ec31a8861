//! Turn runner — the boundary between the conversation-agnostic loop
//! engine and the multi-conversation world.
//!
//! The runner classifies the user message, builds the opaque tool context,
//! and pumps every engine event onto the bus wrapped in an envelope stamped
//! with the conversation id. The engine itself never learns which
//! conversation it is serving.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use vitalis_agent::{classify_intent, TurnEmitter, TurnEngine, TurnMessage, TurnOutcome, TurnRequest};
use vitalis_core::conversation::{ConversationId, MessageId, Role};
use vitalis_core::event::{Envelope, EventBus, TurnEvent};
use vitalis_core::tool::ToolContext;

/// Runs turns and publishes their events on the bus.
pub struct TurnRunner {
    engine: TurnEngine,
    bus: Arc<EventBus>,
}

impl TurnRunner {
    pub fn new(engine: TurnEngine, bus: Arc<EventBus>) -> Self {
        Self { engine, bus }
    }

    /// Run one turn for a conversation. Publishes the intent event, streams
    /// every engine event onto the bus, and returns the final outcome.
    pub async fn run(
        &self,
        conversation_id: ConversationId,
        user_id: &str,
        messages: Vec<TurnMessage>,
    ) -> TurnOutcome {
        let user_message = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let intent = classify_intent(&user_message);
        info!(conversation = %conversation_id, %intent, "running turn");

        self.bus.publish(Envelope::stamped(
            conversation_id.clone(),
            TurnEvent::IntentClassified {
                intent: intent.to_string(),
                user_message,
                timestamp: Utc::now(),
            },
        ));

        let request = TurnRequest {
            messages,
            intent,
            context: ToolContext {
                conversation_id: conversation_id.clone(),
                message_id: MessageId::new(),
                user_id: user_id.to_string(),
                iteration: 0,
            },
            max_iterations: None,
        };

        // Pump engine events onto the bus, stamping the conversation id.
        let (emitter, mut rx) = TurnEmitter::channel();
        let bus = self.bus.clone();
        let stamp = conversation_id.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                bus.publish(Envelope::stamped(stamp.clone(), event));
            }
        });

        let outcome = self.engine.run_turn(request, &emitter).await;

        // Close the channel so the pump drains and exits before we return.
        drop(emitter);
        let _ = pump.await;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vitalis_agent::TurnState;
    use vitalis_core::error::GenerationError;
    use vitalis_core::generation::{Completion, TextGenerator};

    struct Scripted {
        responses: Vec<&'static str>,
        index: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn invoke(&self, _prompt: &str) -> Result<Completion, GenerationError> {
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            let text = self.responses[i.min(self.responses.len() - 1)];
            Ok(Completion { text: text.into() })
        }
    }

    fn runner_with(responses: Vec<&'static str>, bus: Arc<EventBus>) -> TurnRunner {
        let engine = TurnEngine::new(
            Arc::new(Scripted {
                responses,
                index: AtomicUsize::new(0),
            }),
            Arc::new(vitalis_tools::default_registry()),
        );
        TurnRunner::new(engine, bus)
    }

    #[tokio::test]
    async fn every_published_event_is_stamped() {
        let bus = Arc::new(EventBus::new(128));
        let mut rx = bus.subscribe();
        let runner = runner_with(
            vec!["Thought: easy\nAction: finish\nAction Input: {\"answer\": \"ok\"}"],
            bus.clone(),
        );

        let conv = ConversationId::from("c1");
        let outcome = runner
            .run(
                conv.clone(),
                "u1",
                vec![TurnMessage {
                    role: Role::User,
                    content: "hello".into(),
                }],
            )
            .await;
        assert_eq!(outcome.state, TurnState::Finished);

        let mut kinds = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            assert_eq!(envelope.conversation_id, Some(conv.clone()));
            kinds.push(envelope.event.kind());
        }
        assert_eq!(kinds.first(), Some(&"intent"));
        assert!(kinds.contains(&"thinking"));
        assert!(kinds.contains(&"content_delta"));
        assert_eq!(kinds.last(), Some(&"done"));
    }

    #[tokio::test]
    async fn intent_event_carries_user_message() {
        let bus = Arc::new(EventBus::new(128));
        let mut rx = bus.subscribe();
        let runner = runner_with(
            vec!["Thought: ok\nAction: finish\nAction Input: {\"answer\": \"ok\"}"],
            bus.clone(),
        );

        runner
            .run(
                ConversationId::from("c1"),
                "u1",
                vec![TurnMessage {
                    role: Role::User,
                    content: "我头疼".into(),
                }],
            )
            .await;

        let envelope = rx.try_recv().unwrap();
        match &envelope.event {
            TurnEvent::IntentClassified {
                intent,
                user_message,
                ..
            } => {
                assert_eq!(intent, "symptom_consult");
                assert_eq!(user_message, "我头疼");
            }
            other => panic!("expected intent event first, got {other:?}"),
        }
    }
}
