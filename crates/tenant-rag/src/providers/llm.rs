//! Text generation trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Token accounting reported by the generation service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub candidates_tokens: u32,
    pub total_tokens: u32,
}

/// Result of a single-shot generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Trait for text generation services
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a complete answer.
    ///
    /// Fails with `Error::EmptyGenerationResult` when the service returns
    /// no candidate text.
    async fn generate(&self, prompt: &str, model: &str) -> Result<GenerationOutput>;

    /// Generate an answer as an ordered sequence of text fragments.
    ///
    /// The channel closes after the last fragment. Dropping the receiver
    /// stops the upstream read.
    async fn generate_stream(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<mpsc::Receiver<Result<String>>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
