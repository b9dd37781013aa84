//! Document and chunk metadata storage trait

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Chunk, Document, DocumentStatus};

/// Relational store for documents and their chunks
#[async_trait]
pub trait DocumentStoreProvider: Send + Sync {
    async fn create_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    async fn update_status(&self, id: Uuid, status: DocumentStatus) -> Result<()>;

    /// Delete a document together with its chunks
    async fn delete_document(&self, id: Uuid) -> Result<bool>;

    async fn create_chunk(&self, chunk: &Chunk) -> Result<()>;

    async fn get_chunk(&self, id: Uuid) -> Result<Option<Chunk>>;

    /// Chunks of a document ordered by index
    async fn list_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    async fn delete_chunks(&self, document_id: Uuid) -> Result<usize>;
}
