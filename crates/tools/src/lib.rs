//! Built-in tool implementations for Vitalis.
//!
//! Tools give the reasoning loop its capabilities: query the medical
//! knowledge base, search the web, ask the user a follow-up question, and
//! finish the turn. The knowledge and search backends are external
//! services; the implementations here return representative stub results so
//! the full turn pipeline can run end-to-end without them.

pub mod finish;
pub mod follow_up;
pub mod knowledge_lookup;
pub mod web_search;

use vitalis_core::tool::ToolRegistry;

/// Create a default tool registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(knowledge_lookup::KnowledgeLookupTool));
    registry.register(Box::new(web_search::WebSearchTool));
    registry.register(Box::new(follow_up::FollowUpQuestionTool));
    registry.register(Box::new(finish::FinishTool));
    registry
}
