//! tenant-rag: tenant-scoped retrieval-augmented generation core
//!
//! Splits extracted document text into overlapping chunks, embeds them
//! through a rate-limited Vertex AI client, searches them by cosine
//! similarity within a tenant/role scope and grounds Gemini answers in the
//! retrieved context, synchronously or as a token stream.
//!
//! [`RagCore`] wires the SQLite storage, the Vertex AI clients and the
//! orchestrators together; every piece is also usable on its own through
//! the traits in [`providers`].

pub mod app;
pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod logging;
pub mod providers;
pub mod retrieval;
pub mod storage;
pub mod types;

pub use app::RagCore;
pub use config::{RagConfiguration, Settings};
pub use error::{Error, Result};
pub use generation::{ChatOrchestrator, ChatStream};
pub use ingestion::{IngestPipeline, TextChunker};
pub use retrieval::{Retrieval, Retriever, VectorIndex};
pub use storage::Database;
pub use types::{
    ChatRequest, ChatResponse, Chunk, Conversation, ConversationMessage, Document,
    DocumentReference, DocumentStatus, Embedding, MessageRole, Scope, SearchHit, SearchRequest,
};
