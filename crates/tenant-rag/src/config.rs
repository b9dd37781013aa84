//! Configuration for the RAG core
//!
//! Two layers:
//! - [`RagConfiguration`]: per-request tunables held in the configuration store
//!   and re-read on every operation.
//! - [`Settings`]: process settings (GCP project, rate limits, generation
//!   parameters) loaded once from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Key under which the configuration store keeps the RAG configuration
pub const RAG_CONFIGURATION_KEY: &str = "rag_configuration";

/// Tunables consulted by ingestion, retrieval and generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RagConfiguration {
    /// Chunk window in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub chunk_overlap: usize,
    pub chunking_strategy: String,
    pub embedding_model: String,
    /// Document search result count when a request leaves `top_k` at 0
    pub top_k: usize,
    /// Confidence gate for grounded answers, in [0, 1]
    pub similarity_threshold: f32,
    pub retrieval_method: String,
    pub max_chars_per_instance: usize,
    pub text_model: String,
    // Stored and validated for the configuration store's consumers; embedding
    // is one request per chunk and its retries follow `RateLimitSettings`.
    pub embedding_batch_size: usize,
    pub max_retry_attempts: u32,
}

impl Default for RagConfiguration {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            chunking_strategy: "paragraph-based".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            top_k: 5,
            similarity_threshold: 0.7,
            retrieval_method: "similarity-search".to_string(),
            max_chars_per_instance: 12000,
            text_model: "gemini-2.0-flash".to_string(),
            embedding_batch_size: 5,
            max_retry_attempts: 5,
        }
    }
}

impl RagConfiguration {
    /// Validate the invariants the chunker and the confidence gate rely on
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunkSize must be greater than 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::config(format!(
                "chunkOverlap ({}) must be less than chunkSize ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::config(format!(
                "similarityThreshold must be between 0 and 1, got {}",
                self.similarity_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(Error::config("topK must be at least 1"));
        }
        if self.embedding_model.trim().is_empty() || self.text_model.trim().is_empty() {
            return Err(Error::config("model names must not be empty"));
        }
        Ok(())
    }

    /// Documents longer than this are logged as very large during ingestion
    pub fn large_document_threshold(&self) -> usize {
        self.max_chars_per_instance.saturating_mul(10)
    }
}

/// Process-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gcp: GcpSettings,
    pub rate_limits: RateLimitSettings,
    pub generation: GenerationSettings,
    pub chat: ChatSettings,
    pub http: HttpSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read settings {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(format!("Invalid settings: {}", e)))
    }

    /// Override GCP project and location from `GCP_PROJECT_ID` / `GCP_LOCATION`
    pub fn apply_env(mut self) -> Self {
        if let Ok(project) = std::env::var("GCP_PROJECT_ID") {
            if !project.is_empty() {
                self.gcp.project_id = project;
            }
        }
        if let Ok(location) = std::env::var("GCP_LOCATION") {
            if !location.is_empty() {
                self.gcp.location = location;
            }
        }
        self
    }
}

/// Google Cloud settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpSettings {
    pub project_id: String,
    /// Region, e.g. "us-central1"
    pub location: String,
    /// Service account JSON key; takes precedence over `access_token`
    pub service_account_key_path: Option<PathBuf>,
    /// Pre-issued bearer token
    pub access_token: Option<String>,
}

impl Default for GcpSettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: "us-central1".to_string(),
            service_account_key_path: None,
            access_token: None,
        }
    }
}

/// Embedding concurrency and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Permits in the process-wide embedding semaphore
    pub max_concurrent_requests: usize,
    /// Retries after the first rate-limited attempt
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    /// Cooldown before a permit goes back to the semaphore
    pub release_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 1,
            max_retries: 8,
            initial_retry_delay_ms: 2000,
            release_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_jitter_ms: 1000,
        }
    }
}

/// Sampling parameters sent with every generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 2048,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

/// Conversational retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Chunks retrieved per chat turn
    pub retrieval_top_k: usize,
    /// Capacity of the fragment channel in streaming mode
    pub stream_buffer: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            retrieval_top_k: 3,
            stream_buffer: 32,
        }
    }
}

/// HTTP client timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub generation_timeout_secs: u64,
    pub embedding_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            generation_timeout_secs: 300,
            embedding_timeout_secs: 60,
        }
    }
}

impl HttpSettings {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }
}

/// Storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/tenant-rag.db"),
        }
    }
}
