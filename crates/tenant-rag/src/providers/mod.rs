//! Provider abstractions for embeddings, text generation and storage
//!
//! The orchestrators only see these traits; `storage::Database` and the
//! `gcp` clients are the shipped implementations.

pub mod config_store;
pub mod conversation_store;
pub mod document_store;
pub mod embedding;
pub mod gcp;
pub mod llm;
pub mod rate_limit;
pub mod vector_store;

pub use config_store::ConfigurationStore;
pub use conversation_store::ConversationStore;
pub use document_store::DocumentStoreProvider;
pub use embedding::EmbeddingProvider;
pub use llm::{GenerationOutput, TextGenerator, TokenUsage};
pub use rate_limit::{BackoffPolicy, RequestGate, RetryState, Sleeper, TokioSleeper};
pub use vector_store::{VectorMatch, VectorStoreProvider};
