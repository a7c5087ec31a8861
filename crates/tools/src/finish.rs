//! The terminal action.
//!
//! The loop engine short-circuits on this tool name before dispatch, so
//! `execute` normally never runs — the tool exists so the catalogue (and
//! therefore the prompt) documents how to end a turn.

use async_trait::async_trait;
use vitalis_core::error::ToolError;
use vitalis_core::tool::{Tool, ToolContext, ToolOutput, FINISH_TOOL};

pub struct FinishTool;

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        FINISH_TOOL
    }

    fn description(&self) -> &str {
        "Finish the turn with your final answer once you have enough information."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "answer": {
                    "type": "string",
                    "description": "The complete final answer for the user"
                }
            },
            "required": ["answer"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let answer = input["answer"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'answer' argument".into()))?;
        Ok(ToolOutput::text(answer))
    }
}
