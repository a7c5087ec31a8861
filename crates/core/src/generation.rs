//! Text-generation endpoint seam.
//!
//! The actual model endpoint lives outside this workspace; the reasoning
//! loop only ever sees this trait. A failed invocation is turn-fatal for
//! the current iteration and is converted into a fallback response by the
//! loop engine.

use async_trait::async_trait;

use crate::error::GenerationError;

/// A completed generation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
}

/// The external text-generation endpoint.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the assembled prompt text.
    async fn invoke(&self, prompt: &str) -> Result<Completion, GenerationError>;
}
