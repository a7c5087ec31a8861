//! Web search tool — stub for the external search service.
//!
//! Production routes this through a search API; the stub returns canned
//! results so turns that fall back to web search still complete.

use async_trait::async_trait;
use vitalis_core::error::ToolError;
use vitalis_core::tool::{Tool, ToolContext, ToolOutput};

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for recent or general health information not covered by the knowledge base."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 3)",
                    "default": 3
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let query = input["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let max_results = input["max_results"].as_u64().unwrap_or(3).min(10) as usize;

        let results: Vec<serde_json::Value> = (0..max_results)
            .map(|i| {
                serde_json::json!({
                    "title": format!("Result {} for '{}'", i + 1, query),
                    "url": format!("https://health.example.org/articles/{}", i + 1),
                    "snippet": format!(
                        "Overview article {} related to '{}'. Informational only, not medical advice.",
                        i + 1,
                        query
                    ),
                })
            })
            .collect();

        let output = results
            .iter()
            .map(|r| {
                format!(
                    "{} — {}\n{}",
                    r["title"].as_str().unwrap_or_default(),
                    r["url"].as_str().unwrap_or_default(),
                    r["snippet"].as_str().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let urls: Vec<&str> = results
            .iter()
            .filter_map(|r| r["url"].as_str())
            .collect();

        Ok(ToolOutput::with_data(
            output,
            serde_json::json!({ "sources": urls }),
        ))
    }
}
