//! Tenant/role scoped gateway over a vector store

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::vector_store::VectorStoreProvider;
use crate::types::{Embedding, Scope, SimilarityResult};

/// Similarity search and upserts with dimensional consistency checks
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStoreProvider>,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn VectorStoreProvider>) -> Self {
        Self { store }
    }

    /// Store an embedding; its dimension must match the scope's vectors
    pub async fn upsert(&self, embedding: &Embedding) -> Result<()> {
        if embedding.vector.is_empty() {
            return Err(Error::config("cannot store an empty embedding vector"));
        }
        if let Some(stored) = self.store.probe_dimension(&embedding.scope()).await? {
            if stored != embedding.dimensions() {
                return Err(Error::DimensionMismatch {
                    expected: stored,
                    actual: embedding.dimensions(),
                });
            }
        }
        self.store.upsert(embedding).await
    }

    /// Nearest chunks in the scope, descending by similarity.
    ///
    /// The store limits to `top_k` first and results below
    /// `min_similarity` are dropped afterwards, so fewer than `top_k`
    /// results may come back even when more qualifying vectors exist.
    pub async fn search(
        &self,
        query: &[f32],
        scope: &Scope,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SimilarityResult>> {
        let Some(stored) = self.store.probe_dimension(scope).await? else {
            tracing::debug!(scope = %scope, "No embeddings stored for scope");
            return Ok(Vec::new());
        };
        if stored != query.len() {
            return Err(Error::DimensionMismatch {
                expected: stored,
                actual: query.len(),
            });
        }

        let matches = self.store.query(query, scope, top_k).await?;
        let results: Vec<SimilarityResult> = matches
            .into_iter()
            .map(|m| SimilarityResult {
                chunk_id: m.chunk_id,
                document_id: m.document_id,
                similarity: 1.0 - m.distance,
            })
            .filter(|r| r.similarity >= min_similarity)
            .collect();

        tracing::debug!(scope = %scope, top_k, found = results.len(), "Vector search complete");
        Ok(results)
    }

    /// Remove every embedding of a document
    pub async fn delete_document(&self, document_id: Uuid) -> Result<usize> {
        self.store.delete_by_document(document_id).await
    }
}
