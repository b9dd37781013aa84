//! Vector storage trait

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Embedding, Scope};

/// Raw nearest-neighbour match as returned by a store
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    /// Cosine distance in [0, 2]
    pub distance: f32,
}

/// Storage for embeddings with exact cosine-distance queries
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Insert or replace the embedding for its chunk and model
    async fn upsert(&self, embedding: &Embedding) -> Result<()>;

    /// Dimensionality of any stored vector in the scope, `None` if empty
    async fn probe_dimension(&self, scope: &Scope) -> Result<Option<usize>>;

    /// Up to `top_k` matches in the scope, ascending by distance
    async fn query(&self, vector: &[f32], scope: &Scope, top_k: usize) -> Result<Vec<VectorMatch>>;

    /// Remove every embedding of a document; returns the count removed
    async fn delete_by_document(&self, document_id: Uuid) -> Result<usize>;
}
