//! Google Cloud Platform provider implementations
//!
//! - Vertex AI `:predict` for embeddings, gated and retried
//! - Gemini via Vertex AI for answer generation, single-shot and streamed

mod auth;
mod gemini_client;
mod vertex_embedder;

pub use auth::GcpAuth;
pub use gemini_client::GeminiClient;
#[cfg(test)]
pub(crate) use gemini_client::forward_events;
pub use vertex_embedder::{
    parse_embedding, PredictReply, PredictTransport, VertexAiEmbedder, VertexPredictTransport,
};
