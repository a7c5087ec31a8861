//! Shared mocks for engine tests: scripted generators and a small tool
//! registry with success, failure, and follow-up behaviors.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vitalis_core::error::{GenerationError, ToolError};
use vitalis_core::generation::{Completion, TextGenerator};
use vitalis_core::tool::{Tool, ToolContext, ToolOutput, ToolRegistry, FOLLOW_UP_TOOL};

/// Replays scripted responses in order, recording every prompt it sees.
/// When the script runs out it repeats the last response.
pub struct SequentialGenerator {
    responses: Vec<String>,
    index: AtomicUsize,
    prompts: Arc<Mutex<Vec<String>>>,
    repeat_last: bool,
}

impl SequentialGenerator {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            index: AtomicUsize::new(0),
            prompts: Arc::new(Mutex::new(Vec::new())),
            repeat_last: false,
        }
    }

    /// A generator that returns the same response forever.
    pub fn repeating(response: String) -> Self {
        Self {
            responses: vec![response],
            index: AtomicUsize::new(0),
            prompts: Arc::new(Mutex::new(Vec::new())),
            repeat_last: true,
        }
    }

    /// Handle to the recorded prompts.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl TextGenerator for SequentialGenerator {
    async fn invoke(&self, prompt: &str) -> Result<Completion, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        let i = if self.repeat_last || i >= self.responses.len() {
            self.responses.len().saturating_sub(1).min(i)
        } else {
            i
        };
        let text = self
            .responses
            .get(i)
            .cloned()
            .ok_or_else(|| GenerationError::MalformedPayload("script exhausted".into()))?;
        Ok(Completion { text })
    }
}

/// Always fails with a network error.
pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn invoke(&self, _prompt: &str) -> Result<Completion, GenerationError> {
        Err(GenerationError::Network("connection refused".into()))
    }
}

struct LookupStub;

#[async_trait]
impl Tool for LookupStub {
    fn name(&self) -> &str {
        "lookup"
    }
    fn description(&self) -> &str {
        "Look up medical knowledge"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }
    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let query = input["query"].as_str().unwrap_or("");
        Ok(ToolOutput::with_data(
            format!("Found 2 chunks about '{query}'."),
            serde_json::json!({ "sources": ["kb://tension-headache", "kb://hydration"] }),
        ))
    }
}

struct FlakyStub;

#[async_trait]
impl Tool for FlakyStub {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "A tool whose backend is down"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    async fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::failure("backend unavailable", "execution_failed"))
    }
}

struct FollowUpStub;

#[async_trait]
impl Tool for FollowUpStub {
    fn name(&self) -> &str {
        FOLLOW_UP_TOOL
    }
    fn description(&self) -> &str {
        "Ask the user a clarifying question"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "question": { "type": "string" } },
            "required": ["question"]
        })
    }
    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let question = input["question"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'question'".into()))?;
        Ok(ToolOutput::text(question))
    }
}

/// A registry covering the behaviors the engine tests need.
pub fn test_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(LookupStub));
    registry.register(Box::new(FlakyStub));
    registry.register(Box::new(FollowUpStub));
    registry
}
