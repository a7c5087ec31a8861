//! Stub text-generation endpoint for local runs.
//!
//! The real endpoint is injected by the deployment; this stand-in drives a
//! plausible two-step turn (knowledge lookup, then finish) so the full
//! pipeline can be exercised without any external service.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use vitalis_core::error::GenerationError;
use vitalis_core::generation::{Completion, TextGenerator};

pub struct StubEndpoint {
    calls: AtomicUsize,
}

impl StubEndpoint {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    /// Pull the user message back out of the assembled prompt so the
    /// lookup query matches what was asked.
    fn extract_user_message(prompt: &str) -> &str {
        prompt
            .rfind("User message: ")
            .map(|pos| {
                let rest = &prompt[pos + "User message: ".len()..];
                rest.split('\n').next().unwrap_or(rest).trim()
            })
            .unwrap_or("")
    }
}

#[async_trait]
impl TextGenerator for StubEndpoint {
    async fn invoke(&self, prompt: &str) -> Result<Completion, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let text = if call % 2 == 0 {
            let query = Self::extract_user_message(prompt);
            format!(
                "Thought: I should ground this in the knowledge base first.\n\
                 Action: knowledge_lookup\n\
                 Action Input: {}",
                serde_json::json!({ "query": query })
            )
        } else {
            "Thought: I have enough to answer carefully.\n\
             Action: finish\n\
             Action Input: {\"answer\": \"Based on the available guidance: rest, stay hydrated, \
             and monitor your symptoms. If they persist or worsen, please see a clinician. \
             (Stub endpoint — connect a real text-generation service for live answers.)\"}"
                .to_string()
        };
        Ok(Completion { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn alternates_lookup_then_finish() {
        let stub = StubEndpoint::new();
        let first = stub
            .invoke("…\n\nUser message: 我头疼\n\nThought:")
            .await
            .unwrap();
        assert!(first.text.contains("knowledge_lookup"));
        assert!(first.text.contains("我头疼"));

        let second = stub.invoke("whatever").await.unwrap();
        assert!(second.text.contains("finish"));
    }
}
