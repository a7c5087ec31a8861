//! Knowledge lookup tool — stub for the medical knowledge base.
//!
//! In production this queries a vector index over curated medical content.
//! The stub returns topic-matched mock chunks so symptom-consultation turns
//! can be exercised end-to-end.

use async_trait::async_trait;
use vitalis_core::error::ToolError;
use vitalis_core::tool::{Tool, ToolContext, ToolOutput};

pub struct KnowledgeLookupTool;

#[async_trait]
impl Tool for KnowledgeLookupTool {
    fn name(&self) -> &str {
        "knowledge_lookup"
    }

    fn description(&self) -> &str {
        "Query the medical knowledge base for relevant information. Returns content chunks sorted by relevance."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find relevant knowledge"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default 3)",
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

        let top_k = input["top_k"].as_u64().unwrap_or(3).min(10) as usize;

        let chunks = lookup_chunks(query, top_k);
        let sources: Vec<&str> = chunks.iter().map(|c| c.source).collect();
        let output = chunks
            .iter()
            .map(|c| format!("[{}] {}", c.source, c.content))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolOutput::with_data(
            output,
            serde_json::json!({ "sources": sources }),
        ))
    }
}

struct KnowledgeChunk {
    content: &'static str,
    source: &'static str,
}

fn lookup_chunks(query: &str, top_k: usize) -> Vec<KnowledgeChunk> {
    let q = query.to_lowercase();

    // Topic-specific mock knowledge for realistic turn testing.
    if q.contains("headache") || q.contains("头疼") || q.contains("头痛") {
        return vec![
            KnowledgeChunk {
                content: "Tension headaches are the most common type, often triggered by stress, \
                          dehydration, poor sleep, or prolonged screen time. Rest, hydration, and \
                          over-the-counter analgesics usually help.",
                source: "kb://headache/tension",
            },
            KnowledgeChunk {
                content: "Seek medical care promptly for a sudden severe headache, a headache with \
                          fever and stiff neck, or one following a head injury.",
                source: "kb://headache/red-flags",
            },
            KnowledgeChunk {
                content: "Migraine headaches are typically one-sided, pulsating, and worsened by \
                          activity, light, or sound. Recurrent migraines warrant a clinician visit.",
                source: "kb://headache/migraine",
            },
        ]
        .into_iter()
        .take(top_k)
        .collect();
    }

    if q.contains("fever") || q.contains("发烧") {
        return vec![
            KnowledgeChunk {
                content: "A fever is a body temperature of 38°C (100.4°F) or higher. Most fevers \
                          in adults resolve with rest and fluids within a few days.",
                source: "kb://fever/overview",
            },
            KnowledgeChunk {
                content: "Seek care for a fever above 39.4°C, one lasting more than three days, \
                          or fever with rash, confusion, or difficulty breathing.",
                source: "kb://fever/red-flags",
            },
        ]
        .into_iter()
        .take(top_k)
        .collect();
    }

    // Generic fallback.
    (0..top_k)
        .map(|i| KnowledgeChunk {
            content: "General guidance: monitor symptoms, rest, stay hydrated, and consult a \
                      clinician if symptoms persist or worsen.",
            source: match i {
                0 => "kb://general/self-care",
                1 => "kb://general/when-to-seek-care",
                _ => "kb://general/monitoring",
            },
        })
        .collect()
}
