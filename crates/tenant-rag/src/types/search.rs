//! Search results and references

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::Scope;

/// Characters of chunk text kept in a reference preview
pub const PREVIEW_CHARS: usize = 200;

/// A chunk matched by the vector index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    /// `1 - cosine distance`
    pub similarity: f32,
}

/// Source attribution attached to a grounded answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub document_id: Uuid,
    pub file_name: String,
    /// Preview of the chunk text
    pub chunk_content: String,
    pub similarity_score: f32,
}

impl DocumentReference {
    pub fn new(document_id: Uuid, file_name: String, content: &str, similarity_score: f32) -> Self {
        Self {
            document_id,
            file_name,
            chunk_content: preview(content),
            similarity_score,
        }
    }
}

/// First [`PREVIEW_CHARS`] characters followed by an ellipsis
pub fn preview(content: &str) -> String {
    let mut out: String = content.chars().take(PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

/// One result of a stateless document search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: Uuid,
    pub chunk_id: Uuid,
    /// Original upload name of the document
    pub file_name: String,
    pub chunk_content: String,
    pub similarity_score: f32,
    pub chunk_index: u32,
}

/// Parameters of a document search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub scope: Scope,
    /// `0` falls back to the configured `topK`
    pub top_k: usize,
    pub min_similarity: f32,
}
