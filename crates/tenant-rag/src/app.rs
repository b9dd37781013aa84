//! Wiring of storage, providers and orchestrators

use std::sync::Arc;

use crate::config::{ChatSettings, Settings};
use crate::error::Result;
use crate::generation::ChatOrchestrator;
use crate::ingestion::IngestPipeline;
use crate::providers::gcp::{GcpAuth, GeminiClient, VertexAiEmbedder, VertexPredictTransport};
use crate::providers::{EmbeddingProvider, RequestGate, TextGenerator};
use crate::retrieval::{Retriever, VectorIndex};
use crate::storage::Database;

/// Shared handle on a fully wired RAG core
#[derive(Clone)]
pub struct RagCore {
    inner: Arc<RagCoreInner>,
}

struct RagCoreInner {
    database: Arc<Database>,
    ingest: IngestPipeline,
    retriever: Retriever,
    chat: ChatOrchestrator,
}

impl RagCore {
    /// Build the core against Vertex AI and the configured SQLite file
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        tracing::info!(
            project = %settings.gcp.project_id,
            location = %settings.gcp.location,
            "Initializing RAG core"
        );

        let database = Arc::new(Database::new(&settings.storage.database_path)?);
        tracing::info!(path = %settings.storage.database_path.display(), "Database opened");

        let auth = Arc::new(GcpAuth::from_settings(&settings.gcp)?);

        let transport = VertexPredictTransport::new(
            auth.clone(),
            settings.gcp.location.clone(),
            settings.http.embedding_timeout(),
        )?;
        let embedder = VertexAiEmbedder::new(
            Arc::new(transport),
            RequestGate::from_settings(&settings.rate_limits),
            &settings.rate_limits,
        );

        let generator = GeminiClient::new(
            auth,
            settings.gcp.location.clone(),
            settings.generation.clone(),
            settings.http.generation_timeout(),
        )?
        .with_stream_buffer(settings.chat.stream_buffer);

        tracing::info!(
            max_concurrent = settings.rate_limits.max_concurrent_requests,
            max_retries = settings.rate_limits.max_retries,
            "Vertex AI clients ready"
        );

        Ok(Self::with_providers(
            database,
            Arc::new(embedder),
            Arc::new(generator),
            settings.chat.clone(),
        ))
    }

    /// Build the core from explicit providers
    pub fn with_providers(
        database: Arc<Database>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
        chat_settings: ChatSettings,
    ) -> Self {
        let index = VectorIndex::new(database.clone());
        let retriever = Retriever::new(
            embedder.clone(),
            index.clone(),
            database.clone(),
            database.clone(),
        );
        let ingest = IngestPipeline::new(embedder, index, database.clone(), database.clone());
        let chat = ChatOrchestrator::new(
            retriever.clone(),
            generator,
            database.clone(),
            database.clone(),
            chat_settings,
        );

        Self {
            inner: Arc::new(RagCoreInner {
                database,
                ingest,
                retriever,
                chat,
            }),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.inner.database
    }

    pub fn ingest(&self) -> &IngestPipeline {
        &self.inner.ingest
    }

    pub fn retriever(&self) -> &Retriever {
        &self.inner.retriever
    }

    pub fn chat(&self) -> &ChatOrchestrator {
        &self.inner.chat
    }
}
