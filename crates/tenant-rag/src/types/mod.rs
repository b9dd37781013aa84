//! Core types for the RAG core

pub mod chat;
pub mod document;
pub mod search;

pub use chat::{ChatRequest, ChatResponse, Conversation, ConversationMessage, MessageRole};
pub use document::{Chunk, Document, DocumentStatus, Embedding, Scope};
pub use search::{DocumentReference, SearchHit, SearchRequest, SimilarityResult};
