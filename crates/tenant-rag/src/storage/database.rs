//! SQLite database for document, chunk, embedding and conversation storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::document_store::DocumentStoreProvider;
use crate::types::{Chunk, Document, DocumentStatus};

/// SQLite-backed store implementing every storage provider trait
#[derive(Clone)]
pub struct Database {
    pub(super) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::internal(format!("Failed to open database {}: {}", path.display(), e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        tracing::info!("Opened database at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::internal(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                role_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                original_file_name TEXT NOT NULL,
                content_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                status TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_scope ON documents(tenant_id, role_id);

            CREATE TABLE IF NOT EXISTS document_chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON document_chunks(document_id);

            CREATE TABLE IF NOT EXISTS embeddings (
                id TEXT PRIMARY KEY,
                chunk_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                role_id TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL,
                model_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(chunk_id, model_name)
            );

            CREATE INDEX IF NOT EXISTS idx_embeddings_scope ON embeddings(tenant_id, role_id);
            CREATE INDEX IF NOT EXISTS idx_embeddings_document_id ON embeddings(document_id);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversation_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON conversation_messages(conversation_id);

            CREATE TABLE IF NOT EXISTS configuration (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;

        Ok(())
    }

    /// Run a closure against the database on the blocking pool
    pub(super) async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // ==================== Documents ====================

    pub fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO documents (
                id, tenant_id, role_id, user_id, file_name, original_file_name,
                content_type, file_size, status, metadata, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                doc.id.to_string(),
                doc.tenant_id.to_string(),
                doc.role_id.to_string(),
                doc.user_id.to_string(),
                doc.file_name,
                doc.original_file_name,
                doc.content_type,
                doc.file_size as i64,
                doc.status.as_str(),
                doc.metadata.to_string(),
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                r#"
                SELECT id, tenant_id, role_id, user_id, file_name, original_file_name,
                       content_type, file_size, status, metadata, created_at, updated_at
                FROM documents WHERE id = ?1
                "#,
                params![id.to_string()],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    pub fn set_document_status(&self, id: Uuid, status: DocumentStatus) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE documents SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), status.as_str(), Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(Error::not_found("Document", id));
        }
        Ok(())
    }

    /// Delete a document; its chunks and embeddings go with it
    pub fn remove_document(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM embeddings WHERE document_id = ?1", params![id.to_string()])?;
        let deleted = conn.execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    // ==================== Chunks ====================

    pub fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO document_chunks (id, document_id, chunk_index, content, token_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                chunk.id.to_string(),
                chunk.document_id.to_string(),
                chunk.index as i64,
                chunk.content,
                chunk.token_estimate as i64,
                chunk.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_chunk(&self, id: Uuid) -> Result<Option<Chunk>> {
        let conn = self.conn.lock();
        let chunk = conn
            .query_row(
                r#"
                SELECT id, document_id, chunk_index, content, token_count, created_at
                FROM document_chunks WHERE id = ?1
                "#,
                params![id.to_string()],
                row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    pub fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, document_id, chunk_index, content, token_count, created_at
            FROM document_chunks WHERE document_id = ?1 ORDER BY chunk_index
            "#,
        )?;
        let chunks = stmt
            .query_map(params![document_id.to_string()], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn remove_chunks(&self, document_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM document_chunks WHERE document_id = ?1",
            params![document_id.to_string()],
        )?;
        Ok(deleted)
    }
}

#[async_trait]
impl DocumentStoreProvider for Database {
    async fn create_document(&self, document: &Document) -> Result<()> {
        let document = document.clone();
        self.blocking(move |db| db.insert_document(&document)).await
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        self.blocking(move |db| db.find_document(id)).await
    }

    async fn update_status(&self, id: Uuid, status: DocumentStatus) -> Result<()> {
        self.blocking(move |db| db.set_document_status(id, status)).await
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        self.blocking(move |db| db.remove_document(id)).await
    }

    async fn create_chunk(&self, chunk: &Chunk) -> Result<()> {
        let chunk = chunk.clone();
        self.blocking(move |db| db.insert_chunk(&chunk)).await
    }

    async fn get_chunk(&self, id: Uuid) -> Result<Option<Chunk>> {
        self.blocking(move |db| db.find_chunk(id)).await
    }

    async fn list_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        self.blocking(move |db| db.chunks_for_document(document_id)).await
    }

    async fn delete_chunks(&self, document_id: Uuid) -> Result<usize> {
        self.blocking(move |db| db.remove_chunks(document_id)).await
    }
}

// ==================== Row helpers ====================

pub(super) fn parse_uuid(value: &str, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

pub(super) fn parse_timestamp(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let id: String = row.get(0)?;
    let tenant_id: String = row.get(1)?;
    let role_id: String = row.get(2)?;
    let user_id: String = row.get(3)?;
    let file_size: i64 = row.get(7)?;
    let status: String = row.get(8)?;
    let metadata: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Document {
        id: parse_uuid(&id, 0)?,
        tenant_id: parse_uuid(&tenant_id, 1)?,
        role_id: parse_uuid(&role_id, 2)?,
        user_id: parse_uuid(&user_id, 3)?,
        file_name: row.get(4)?,
        original_file_name: row.get(5)?,
        content_type: row.get(6)?,
        file_size: file_size.max(0) as u64,
        status: DocumentStatus::parse(&status),
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        created_at: parse_timestamp(&created_at, 10)?,
        updated_at: parse_timestamp(&updated_at, 11)?,
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let index: i64 = row.get(2)?;
    let token_count: i64 = row.get(4)?;
    let created_at: String = row.get(5)?;

    Ok(Chunk {
        id: parse_uuid(&id, 0)?,
        document_id: parse_uuid(&document_id, 1)?,
        index: index as u32,
        content: row.get(3)?,
        token_estimate: token_count as u32,
        created_at: parse_timestamp(&created_at, 5)?,
    })
}
