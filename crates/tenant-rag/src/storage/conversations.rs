//! Conversation log and configuration storage

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::database::{parse_timestamp, parse_uuid, Database};
use crate::config::{RagConfiguration, RAG_CONFIGURATION_KEY};
use crate::error::{Error, Result};
use crate::providers::config_store::ConfigurationStore;
use crate::providers::conversation_store::ConversationStore;
use crate::types::{Conversation, ConversationMessage, MessageRole};

impl Database {
    // ==================== Conversations ====================

    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (id, user_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.id.to_string(),
                conversation.user_id.to_string(),
                conversation.title,
                conversation.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conn = self.conn.lock();
        let conversation = conn
            .query_row(
                "SELECT id, user_id, title, created_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let id: String = row.get(0)?;
                    let user_id: String = row.get(1)?;
                    let created_at: String = row.get(3)?;
                    Ok(Conversation {
                        id: parse_uuid(&id, 0)?,
                        user_id: parse_uuid(&user_id, 1)?,
                        title: row.get(2)?,
                        created_at: parse_timestamp(&created_at, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(conversation)
    }

    /// Append a turn to an existing conversation
    pub fn append_message(&self, message: &ConversationMessage) -> Result<()> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![message.conversation_id.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::not_found("Conversation", message.conversation_id));
        }

        conn.execute(
            r#"
            INSERT INTO conversation_messages (id, conversation_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.role.as_str(),
                message.content,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn messages_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<ConversationMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM conversation_messages WHERE conversation_id = ?1 ORDER BY seq
            "#,
        )?;
        let messages = stmt
            .query_map(params![conversation_id.to_string()], |row| {
                let id: String = row.get(0)?;
                let conversation_id: String = row.get(1)?;
                let role: String = row.get(2)?;
                let created_at: String = row.get(4)?;
                Ok(ConversationMessage {
                    id: parse_uuid(&id, 0)?,
                    conversation_id: parse_uuid(&conversation_id, 1)?,
                    role: MessageRole::parse(&role).unwrap_or(MessageRole::System),
                    content: row.get(3)?,
                    created_at: parse_timestamp(&created_at, 4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    // ==================== Configuration ====================

    pub fn read_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM configuration WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn write_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO configuration (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM configuration WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Stored RAG configuration, or defaults when missing or unreadable
    pub fn rag_configuration(&self) -> Result<RagConfiguration> {
        let Some(raw) = self.read_setting(RAG_CONFIGURATION_KEY)? else {
            return Ok(RagConfiguration::default());
        };
        match serde_json::from_str::<RagConfiguration>(&raw) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(error = %e, "Stored RAG configuration is invalid, using defaults");
                Ok(RagConfiguration::default())
            }
        }
    }
}

#[async_trait]
impl ConversationStore for Database {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conversation = conversation.clone();
        self.blocking(move |db| db.insert_conversation(&conversation)).await
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.blocking(move |db| db.find_conversation(id)).await
    }

    async fn add_message(&self, message: &ConversationMessage) -> Result<()> {
        let message = message.clone();
        self.blocking(move |db| db.append_message(&message)).await
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<ConversationMessage>> {
        self.blocking(move |db| db.messages_for_conversation(conversation_id)).await
    }
}

#[async_trait]
impl ConfigurationStore for Database {
    async fn get(&self) -> Result<RagConfiguration> {
        self.blocking(|db| db.rag_configuration()).await
    }

    async fn update(&self, config: &RagConfiguration) -> Result<()> {
        config.validate()?;
        let raw = serde_json::to_string(config)?;
        self.blocking(move |db| db.write_setting(RAG_CONFIGURATION_KEY, &raw))
            .await?;
        tracing::info!("RAG configuration updated");
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.blocking(|db| db.delete_setting(RAG_CONFIGURATION_KEY)).await?;
        tracing::info!("RAG configuration reset to defaults");
        Ok(())
    }
}
