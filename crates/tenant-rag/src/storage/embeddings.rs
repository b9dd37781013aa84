//! Embedding storage with exact cosine-distance search

use async_trait::async_trait;
use rusqlite::params;
use uuid::Uuid;

use super::database::{parse_uuid, Database};
use crate::error::Result;
use crate::providers::vector_store::{VectorMatch, VectorStoreProvider};
use crate::types::{Embedding, Scope};

/// Little-endian f32 encoding for the `vector` column
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// `1 - cos(a, b)`; a zero vector is treated as orthogonal to everything
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl Database {
    /// Insert or replace the embedding of a chunk for its model
    pub fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO embeddings (
                id, chunk_id, document_id, tenant_id, role_id, dimensions,
                vector, model_name, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(chunk_id, model_name) DO UPDATE SET
                id = excluded.id,
                document_id = excluded.document_id,
                tenant_id = excluded.tenant_id,
                role_id = excluded.role_id,
                dimensions = excluded.dimensions,
                vector = excluded.vector,
                created_at = excluded.created_at
            "#,
            params![
                embedding.id.to_string(),
                embedding.chunk_id.to_string(),
                embedding.document_id.to_string(),
                embedding.tenant_id.to_string(),
                embedding.role_id.to_string(),
                embedding.vector.len() as i64,
                encode_vector(&embedding.vector),
                embedding.model_name,
                embedding.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Dimensionality of one stored vector in the scope
    pub fn scope_dimension(&self, scope: &Scope) -> Result<Option<usize>> {
        use rusqlite::OptionalExtension;

        let conn = self.conn.lock();
        let dims: Option<i64> = conn
            .query_row(
                "SELECT dimensions FROM embeddings WHERE tenant_id = ?1 AND role_id = ?2 LIMIT 1",
                params![scope.tenant_id.to_string(), scope.role_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dims.map(|d| d as usize))
    }

    /// Exact scan of the scope, ascending by cosine distance, limited to `top_k`
    pub fn nearest(&self, vector: &[f32], scope: &Scope, top_k: usize) -> Result<Vec<VectorMatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT chunk_id, document_id, vector FROM embeddings
            WHERE tenant_id = ?1 AND role_id = ?2 AND dimensions = ?3
            "#,
        )?;

        let rows = stmt.query_map(
            params![
                scope.tenant_id.to_string(),
                scope.role_id.to_string(),
                vector.len() as i64
            ],
            |row| {
                let chunk_id: String = row.get(0)?;
                let document_id: String = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                Ok(VectorMatch {
                    chunk_id: parse_uuid(&chunk_id, 0)?,
                    document_id: parse_uuid(&document_id, 1)?,
                    distance: cosine_distance(vector, &decode_vector(&blob)),
                })
            },
        )?;

        let mut matches = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(top_k);
        Ok(matches)
    }

    pub fn remove_embeddings(&self, document_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM embeddings WHERE document_id = ?1",
            params![document_id.to_string()],
        )?;
        Ok(deleted)
    }
}

#[async_trait]
impl VectorStoreProvider for Database {
    async fn upsert(&self, embedding: &Embedding) -> Result<()> {
        let embedding = embedding.clone();
        self.blocking(move |db| db.upsert_embedding(&embedding)).await
    }

    async fn probe_dimension(&self, scope: &Scope) -> Result<Option<usize>> {
        let scope = *scope;
        self.blocking(move |db| db.scope_dimension(&scope)).await
    }

    async fn query(&self, vector: &[f32], scope: &Scope, top_k: usize) -> Result<Vec<VectorMatch>> {
        let vector = vector.to_vec();
        let scope = *scope;
        self.blocking(move |db| db.nearest(&vector, &scope, top_k)).await
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<usize> {
        self.blocking(move |db| db.remove_embeddings(document_id)).await
    }
}
