//! Document ingestion: chunk, embed and index extracted text

use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::chunker::TextChunker;
use crate::error::{Error, Result};
use crate::providers::{ConfigurationStore, DocumentStoreProvider, EmbeddingProvider};
use crate::retrieval::VectorIndex;
use crate::types::{Document, DocumentStatus, Embedding};

/// Summary of a processed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: Uuid,
    pub chunks: usize,
    /// Chunks removed from a previous run
    pub replaced_chunks: usize,
}

/// Runs extracted text through chunker, embedder and vector index
#[derive(Clone)]
pub struct IngestPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: VectorIndex,
    documents: Arc<dyn DocumentStoreProvider>,
    config: Arc<dyn ConfigurationStore>,
}

impl IngestPipeline {
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

    /// Register a document so it can be processed later
    pub async fn register(&self, document: &Document) -> Result<()> {
        self.documents.create_document(document).await?;
        tracing::info!(document.id = %document.id, file = %document.original_file_name, "Registered document");
        Ok(())
    }

    /// (Re)process a stored document from its extracted text.
    ///
    /// Previous chunks and embeddings are removed first. Chunks are embedded
    /// and stored strictly in order; any failure marks the document `error`.
    pub async fn process_document(&self, document_id: Uuid, text: &str) -> Result<IngestReport> {
        let document = self
            .documents
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::not_found("Document", document_id))?;

        self.documents
            .update_status(document_id, DocumentStatus::Processing)
            .await?;

        match self.index_text(&document, text).await {
            Ok(report) => {
                self.documents
                    .update_status(document_id, DocumentStatus::Indexed)
                    .await?;
                Ok(report)
            }
            Err(e) => {
                tracing::error!(document.id = %document_id, error = %e, "Document processing failed");
                if let Err(status_err) = self
                    .documents
                    .update_status(document_id, DocumentStatus::Error)
                    .await
                {
                    tracing::error!(document.id = %document_id, error = %status_err, "Failed to mark document as errored");
                }
                Err(e)
            }
        }
    }

    /// Delete a document with its chunks and embeddings
    pub async fn delete_document(&self, document_id: Uuid) -> Result<bool> {
        let embeddings = self.index.delete_document(document_id).await?;
        let deleted = self.documents.delete_document(document_id).await?;
        if deleted {
            tracing::info!(document.id = %document_id, embeddings, "Deleted document");
        }
        Ok(deleted)
    }

    async fn index_text(&self, document: &Document, text: &str) -> Result<IngestReport> {
        let start = Instant::now();
        let config = self.config.get().await?;
        let chunker = TextChunker::from_config(&config)?;

        self.index.delete_document(document.id).await?;
        let replaced_chunks = self.documents.delete_chunks(document.id).await?;
        if replaced_chunks > 0 {
            tracing::info!(document.id = %document.id, replaced_chunks, "Removed previous chunks");
        }

        let text_chars = text.chars().count();
        if text_chars > config.large_document_threshold() {
            tracing::warn!(
                document.id = %document.id,
                chars = text_chars,
                "Very large document, ingestion may take a while"
            );
        }

        let chunks = chunker.chunk_document(document.id, text);
        let scope = document.scope();

        for chunk in &chunks {
            self.documents.create_chunk(chunk).await?;
            let vector = self
                .embedder
                .embed(&chunk.content, &config.embedding_model)
                .await?;
            let embedding = Embedding::new(chunk, scope, vector, config.embedding_model.as_str());
            self.index.upsert(&embedding).await?;
            tracing::debug!(document.id = %document.id, chunk = chunk.index, "Indexed chunk");
        }

        tracing::info!(
            document.id = %document.id,
            chunks = chunks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Document indexed"
        );

        Ok(IngestReport {
            document_id: document.id,
            chunks: chunks.len(),
            replaced_chunks,
        })
    }
}
