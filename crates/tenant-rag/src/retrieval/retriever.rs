//! Query-time retrieval: embed, search, gate on confidence, resolve chunks

use std::sync::Arc;

use crate::config::RagConfiguration;
use crate::error::Result;
use crate::generation::prompt::PromptBuilder;
use crate::providers::{ConfigurationStore, DocumentStoreProvider, EmbeddingProvider};
use crate::types::{
    Chunk, Document, DocumentReference, Scope, SearchHit, SearchRequest, SimilarityResult,
};

use super::index::VectorIndex;

/// Context assembled from chunks that passed the confidence gate
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    /// `[Document: name]` blocks in similarity order
    pub context: String,
    pub references: Vec<DocumentReference>,
    pub max_similarity: f32,
}

/// Outcome of a retrieval
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// Nothing matched in the scope, or no matched chunk could be resolved
    NoResults,
    /// Matches exist but the best one is under the similarity threshold
    BelowConfidence { max_similarity: f32 },
    Grounded(RetrievedContext),
}

impl Retrieval {
    /// Best similarity seen, if anything matched
    pub fn max_similarity(&self) -> Option<f32> {
        match self {
            Self::NoResults => None,
            Self::BelowConfidence { max_similarity } => Some(*max_similarity),
            Self::Grounded(ctx) => Some(ctx.max_similarity),
        }
    }

    pub fn is_grounded(&self) -> bool {
        matches!(self, Self::Grounded(_))
    }
}

/// Embeds queries and turns vector matches into prompt context
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: VectorIndex,
    documents: Arc<dyn DocumentStoreProvider>,
    config: Arc<dyn ConfigurationStore>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: VectorIndex,
        documents: Arc<dyn DocumentStoreProvider>,
        config: Arc<dyn ConfigurationStore>,
    ) -> Self {
        Self {
            embedder,
            index,
            documents,
            config,
        }
    }

    /// Retrieve context for a query using the current configuration
    pub async fn retrieve(
        &self,
        query: &str,
        scope: &Scope,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Retrieval> {
        let config = self.config.get().await?;
        self.retrieve_with(&config, query, scope, top_k, min_similarity)
            .await
    }

    /// Retrieve context with an already loaded configuration
    pub async fn retrieve_with(
        &self,
        config: &RagConfiguration,
        query: &str,
        scope: &Scope,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Retrieval> {
        let query_vector = self.embedder.embed(query, &config.embedding_model).await?;
        let results = self
            .index
            .search(&query_vector, scope, top_k, min_similarity)
            .await?;

        if results.is_empty() {
            tracing::info!(scope = %scope, "No chunks matched query");
            return Ok(Retrieval::NoResults);
        }

        let max_similarity = results
            .iter()
            .map(|r| r.similarity)
            .fold(f32::MIN, f32::max);

        if max_similarity < config.similarity_threshold {
            tracing::info!(
                max_similarity,
                threshold = config.similarity_threshold,
                "Best match below confidence threshold"
            );
            return Ok(Retrieval::BelowConfidence { max_similarity });
        }

        let resolved = self.resolve(&results).await?;
        if resolved.is_empty() {
            tracing::warn!(scope = %scope, "Matched chunks no longer exist");
            return Ok(Retrieval::NoResults);
        }

        let blocks: Vec<(&str, &str)> = resolved
            .iter()
            .map(|(_, chunk, doc)| (doc.file_name.as_str(), chunk.content.as_str()))
            .collect();
        let references = resolved
            .iter()
            .map(|(result, chunk, doc)| {
                DocumentReference::new(doc.id, doc.file_name.clone(), &chunk.content, result.similarity)
            })
            .collect();

        tracing::info!(chunks = resolved.len(), max_similarity, "Retrieved grounded context");

        Ok(Retrieval::Grounded(RetrievedContext {
            context: PromptBuilder::build_context(&blocks),
            references,
            max_similarity,
        }))
    }

    /// Stateless ranked search over a scope; no gate, no prompt
    pub async fn search_documents(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let config = self.config.get().await?;
        let top_k = match request.top_k {
            0 => config.top_k,
            n => n,
        };
        let query_vector = self
            .embedder
            .embed(&request.query, &config.embedding_model)
            .await?;
        let results = self
            .index
            .search(&query_vector, &request.scope, top_k, request.min_similarity)
            .await?;

        let hits: Vec<SearchHit> = self
            .resolve(&results)
            .await?
            .into_iter()
            .map(|(result, chunk, doc)| SearchHit {
                document_id: doc.id,
                chunk_id: chunk.id,
                file_name: doc.original_file_name,
                chunk_content: chunk.content,
                similarity_score: result.similarity,
                chunk_index: chunk.index,
            })
            .collect();

        tracing::info!(scope = %request.scope, found = hits.len(), "Document search complete");
        Ok(hits)
    }

    /// Load chunk and parent document for each result, skipping vanished ones
    async fn resolve(
        &self,
        results: &[SimilarityResult],
    ) -> Result<Vec<(SimilarityResult, Chunk, Document)>> {
        let mut resolved = Vec::with_capacity(results.len());
        for result in results {
            let Some(chunk) = self.documents.get_chunk(result.chunk_id).await? else {
                tracing::warn!(chunk_id = %result.chunk_id, "Skipping missing chunk");
                continue;
            };
            let Some(doc) = self.documents.get_document(chunk.document_id).await? else {
                tracing::warn!(document_id = %chunk.document_id, "Skipping chunk of missing document");
                continue;
            };
            resolved.push((*result, chunk, doc));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::config_store::StaticConfiguration;
    use crate::storage::Database;
    use crate::types::Embedding;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Returns a fixed vector regardless of input
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str, _model: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct Fixture {
        db: Arc<Database>,
        scope: Scope,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                db: Arc::new(Database::in_memory().unwrap()),
                scope: Scope::new(Uuid::new_v4(), Uuid::new_v4()),
            }
        }

        fn retriever(&self, threshold: f32) -> Retriever {
            let config = RagConfiguration {
                similarity_threshold: threshold,
                ..Default::default()
            };
            Retriever::new(
                Arc::new(FixedEmbedder(vec![1.0, 0.0])),
                VectorIndex::new(self.db.clone()),
                self.db.clone(),
                Arc::new(StaticConfiguration(config)),
            )
        }

        /// Store a chunk whose vector has the given cosine similarity to [1, 0]
        async fn add_chunk(&self, name: &str, content: &str, similarity: f32) -> Chunk {
            let doc = Document::new(
                self.scope,
                Uuid::new_v4(),
                format!("stored-{}", name),
                name,
                "text/plain",
                content.len() as u64,
            );
            self.db.create_document(&doc).await.unwrap();
            let chunk = Chunk::new(doc.id, 0, content.to_string());
            self.db.create_chunk(&chunk).await.unwrap();

            let other = (1.0 - similarity * similarity).max(0.0).sqrt();
            let embedding = Embedding::new(&chunk, self.scope, vec![similarity, other], "m");
            VectorIndex::new(self.db.clone()).upsert(&embedding).await.unwrap();
            chunk
        }
    }

    #[tokio::test]
    async fn test_grounded_when_best_match_clears_threshold() {
        let fx = Fixture::new();
        fx.add_chunk("a.txt", "Alpha content", 0.9).await;
        fx.add_chunk("b.txt", "Beta content", 0.5).await;

        let retrieval = fx.retriever(0.7).retrieve("q", &fx.scope, 3, 0.0).await.unwrap();
        let ctx = match retrieval {
            Retrieval::Grounded(ctx) => ctx,
            other => panic!("expected grounded retrieval, got {other:?}"),
        };
        assert!((ctx.max_similarity - 0.9).abs() < 1e-4);
        assert_eq!(ctx.references.len(), 2);
        assert_eq!(ctx.references[0].file_name, "stored-a.txt");
        assert_eq!(ctx.references[0].chunk_content, "Alpha content...");
        assert!(ctx
            .context
            .starts_with("[Document: stored-a.txt]\nAlpha content\n\n[Document: stored-b.txt]"));
    }

    #[tokio::test]
    async fn test_below_confidence() {
        let fx = Fixture::new();
        fx.add_chunk("a.txt", "Alpha", 0.9).await;
        fx.add_chunk("b.txt", "Beta", 0.5).await;

        let retrieval = fx.retriever(0.95).retrieve("q", &fx.scope, 3, 0.0).await.unwrap();
        match retrieval {
            Retrieval::BelowConfidence { max_similarity } => {
                assert!((max_similarity - 0.9).abs() < 1e-4)
            }
            other => panic!("expected below confidence, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_results_in_empty_scope() {
        let fx = Fixture::new();
        let retrieval = fx.retriever(0.7).retrieve("q", &fx.scope, 3, 0.0).await.unwrap();
        assert_eq!(retrieval, Retrieval::NoResults);
        assert_eq!(retrieval.max_similarity(), None);
    }

    #[tokio::test]
    async fn test_vanished_chunks_are_skipped() {
        let fx = Fixture::new();
        let kept = fx.add_chunk("a.txt", "Kept", 0.9).await;
        let dropped = fx.add_chunk("b.txt", "Dropped", 0.8).await;
        fx.db.delete_chunks(dropped.document_id).await.unwrap();

        let Retrieval::Grounded(ctx) = fx.retriever(0.7).retrieve("q", &fx.scope, 3, 0.0).await.unwrap() else {
            panic!("expected grounded retrieval");
        };
        assert_eq!(ctx.references.len(), 1);
        assert_eq!(ctx.references[0].document_id, kept.document_id);
    }

    #[tokio::test]
    async fn test_search_documents_reports_original_names() {
        let fx = Fixture::new();
        fx.add_chunk("high.txt", "High", 0.95).await;
        fx.add_chunk("mid.txt", "Mid", 0.6).await;
        fx.add_chunk("low.txt", "Low", 0.2).await;

        let request = SearchRequest {
            query: "q".to_string(),
            scope: fx.scope,
            top_k: 5,
            min_similarity: 0.5,
        };
        // no confidence gate: a strict threshold does not matter here
        let hits = fx.retriever(0.99).search_documents(&request).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file_name, "high.txt");
        assert_eq!(hits[1].file_name, "mid.txt");
        assert_eq!(hits[0].chunk_content, "High");
        assert_eq!(hits[0].chunk_index, 0);
        assert!(hits[0].similarity_score > hits[1].similarity_score);
    }

    #[tokio::test]
    async fn test_search_documents_defaults_to_configured_top_k() {
        let fx = Fixture::new();
        for i in 0..7 {
            fx.add_chunk(&format!("{i}.txt"), "Chunk", 0.9 - i as f32 * 0.05).await;
        }

        let request = SearchRequest {
            query: "q".to_string(),
            scope: fx.scope,
            top_k: 0,
            min_similarity: 0.0,
        };
        let hits = fx.retriever(0.7).search_documents(&request).await.unwrap();
        assert_eq!(hits.len(), RagConfiguration::default().top_k);
        assert_eq!(hits[0].file_name, "0.txt");

        let request = SearchRequest { top_k: 2, ..request };
        assert_eq!(fx.retriever(0.7).search_documents(&request).await.unwrap().len(), 2);
    }
}
