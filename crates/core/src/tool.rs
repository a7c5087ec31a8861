//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what let the assistant act during a turn: look up medical
//! knowledge, search the web, ask the user a follow-up question, or finish
//! the turn with a synthesized answer. Tool *internals* are external
//! collaborators; this crate only defines the seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::conversation::{ConversationId, MessageId};
use crate::error::ToolError;

/// The designated terminal action: dispatching it ends the turn successfully.
pub const FINISH_TOOL: &str = "finish";

/// The tool that asks the user a clarifying question. A successful dispatch
/// yields the turn back to the user even though the model did not finish.
pub const FOLLOW_UP_TOOL: &str = "ask_followup_question";

/// Per-call execution context handed to every tool.
///
/// The loop engine treats this as an opaque handle — the ids are filled in
/// by the boundary that started the turn; only `iteration` changes inside
/// the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub user_id: String,
    pub iteration: u32,
}

impl ToolContext {
    /// The same context at a given loop iteration.
    pub fn at_iteration(&self, iteration: u32) -> Self {
        Self {
            iteration,
            ..self.clone()
        }
    }
}

/// The result of a tool execution.
///
/// A captured failure (`success: false`) is a normal, recoverable outcome
/// the loop records as an observation. A [`ToolError`] from `execute` is an
/// infrastructure failure and is turn-fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool accomplished its task.
    pub success: bool,

    /// Human/model-readable output text (becomes the observation). For a
    /// failed execution this is the error description.
    pub output: String,

    /// Machine-readable failure category when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Optional structured payload; object payloads are surfaced to clients
    /// as metadata events (sources, advisories, suggested actions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    /// A successful plain-text result.
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_type: None,
            data: None,
        }
    }

    /// A successful result with a structured payload.
    pub fn with_data(output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_type: None,
            data: Some(data),
        }
    }

    /// A captured failure.
    pub fn failure(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            success: false,
            output: error.into(),
            error_type: Some(error_type.into()),
            data: None,
        }
    }
}

/// A description of a tool, rendered into the loop engine's prompt catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The core Tool trait.
///
/// Each capability (knowledge lookup, web search, follow-up question, finish)
/// implements this trait. Tools are registered in the [`ToolRegistry`] and
/// dispatched by the reasoning loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "knowledge_lookup").
    fn name(&self) -> &str;

    /// A description of what this tool does (rendered into the prompt).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given structured input.
    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for the prompt catalogue.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The reasoning loop uses this to:
/// 1. Render the tool catalogue into the prompt
/// 2. Look up and execute tools when the model requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool definitions (for the prompt catalogue).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(input, ctx).await
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
