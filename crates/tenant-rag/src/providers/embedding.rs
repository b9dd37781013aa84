//! Embedding provider trait for generating text embeddings

use async_trait::async_trait;

use crate::error::Result;

/// Trait for generating text embeddings
///
/// Implementations:
/// - `VertexAiEmbedder`: Vertex AI `:predict` behind a rate-limit gate
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text with the named model
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
