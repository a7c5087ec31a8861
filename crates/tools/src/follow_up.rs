//! Follow-up question tool.
//!
//! A successful dispatch of this tool yields the turn back to the user: the
//! loop engine transitions to `WaitingForUser` instead of continuing to
//! iterate, and the question text becomes the streamed assistant content.

use async_trait::async_trait;
use vitalis_core::error::ToolError;
use vitalis_core::tool::{Tool, ToolContext, ToolOutput, FOLLOW_UP_TOOL};

pub struct FollowUpQuestionTool;

#[async_trait]
impl Tool for FollowUpQuestionTool {
    fn name(&self) -> &str {
        FOLLOW_UP_TOOL
    }

    fn description(&self) -> &str {
        "Ask the user one clarifying question when their message is too vague to answer safely. \
         Ends your turn; the user's reply starts the next one."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The single clarifying question to ask the user"
                }
            },
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
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'question' argument".into()))?;

        Ok(ToolOutput::text(question))
    }
}
