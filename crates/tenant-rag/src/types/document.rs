//! Documents, chunks and embeddings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tenant/role pair that bounds ingestion and search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: Uuid,
    pub role_id: Uuid,
}

impl Scope {
    pub fn new(tenant_id: Uuid, role_id: Uuid) -> Self {
        Self { tenant_id, role_id }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.role_id)
    }
}

/// Processing status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Indexed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Indexed => "indexed",
            Self::Error => "error",
        }
    }

    /// Parse a stored status; unknown values map to `Error`
    pub fn parse(s: &str) -> Self {
        match s {
            "uploading" => Self::Uploading,
            "processing" => Self::Processing,
            "indexed" => Self::Indexed,
            _ => Self::Error,
        }
    }
}

/// Uploaded document metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub role_id: Uuid,
    pub user_id: Uuid,
    /// Stored (internal) file name
    pub file_name: String,
    /// Name the file was uploaded with
    pub original_file_name: String,
    pub content_type: String,
    pub file_size: u64,
    pub status: DocumentStatus,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document in the `uploading` state
    pub fn new(
        scope: Scope,
        user_id: Uuid,
        file_name: impl Into<String>,
        original_file_name: impl Into<String>,
        content_type: impl Into<String>,
        file_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: scope.tenant_id,
            role_id: scope.role_id,
            user_id,
            file_name: file_name.into(),
            original_file_name: original_file_name.into(),
            content_type: content_type.into(),
            file_size,
            status: DocumentStatus::Uploading,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.tenant_id, self.role_id)
    }
}

/// A contiguous segment of a document's text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Position within the document, dense from 0
    pub index: u32,
    pub content: String,
    pub token_estimate: u32,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(document_id: Uuid, index: u32, content: String) -> Self {
        let token_estimate = estimate_tokens(&content);
        Self {
            id: Uuid::new_v4(),
            document_id,
            index,
            content,
            token_estimate,
            created_at: Utc::now(),
        }
    }
}

/// Rough token count: one token per four characters
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() / 4) as u32
}

/// Vector representation of one chunk under one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: Uuid,
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub role_id: Uuid,
    pub vector: Vec<f32>,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub fn new(chunk: &Chunk, scope: Scope, vector: Vec<f32>, model_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            tenant_id: scope.tenant_id,
            role_id: scope.role_id,
            vector,
            model_name: model_name.into(),
            created_at: Utc::now(),
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.tenant_id, self.role_id)
    }

    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}
