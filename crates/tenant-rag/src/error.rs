//! Error types for the RAG core

use thiserror::Error;

/// Result type alias for RAG operations
pub type Result<T> = std::result::Result<T, Error>;

/// RAG core errors
#[derive(Debug, Error)]
pub enum Error {
    /// The embedding service kept answering with a rate-limit signal
    #[error("Rate limit exceeded after {attempts} attempts: {last_error}")]
    RateLimitExceeded { attempts: u32, last_error: String },

    /// Query vector and stored vectors disagree on dimensionality
    #[error("Embedding dimension mismatch: stored vectors have {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The generation service returned no candidate text
    #[error("Generation returned no candidates")]
    EmptyGenerationResult,

    /// Non rate-limit failure reported by a remote service
    #[error("{service} request failed ({status}): {message}")]
    Remote {
        service: String,
        status: u16,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record not found
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// SQLite error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a remote service error
    pub fn remote(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the caller may reasonably retry the whole operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Blocking task failed: {}", err))
    }
}
