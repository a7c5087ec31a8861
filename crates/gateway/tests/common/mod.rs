//! Shared fixtures for gateway integration tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vitalis_core::error::GenerationError;
use vitalis_core::generation::{Completion, TextGenerator};

/// Replays scripted completions in order, repeating the last one.
pub struct ScriptedGenerator {
    responses: Vec<String>,
    index: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: responses.into_iter().map(String::from).collect(),
            index: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn invoke(&self, _prompt: &str) -> Result<Completion, GenerationError> {
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        let text = self.responses[i.min(self.responses.len() - 1)].clone();
        Ok(Completion { text })
    }
}
