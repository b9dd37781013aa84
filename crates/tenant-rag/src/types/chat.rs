//! Conversations and chat exchange types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::Scope;
use super::search::DocumentReference;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

/// A single persisted turn; never modified after insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(conversation_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// One user turn submitted to the chat orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: Uuid,
    pub message: String,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
    /// Retrieval runs only when a scope is given
    #[serde(default)]
    pub scope: Option<Scope>,
}

fn default_use_rag() -> bool {
    true
}

impl ChatRequest {
    pub fn new(conversation_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            conversation_id,
            message: message.into(),
            use_rag: true,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn without_rag(mut self) -> Self {
        self.use_rag = false;
        self
    }
}

/// Answer to a synchronous chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: Uuid,
    /// Id of the persisted assistant message
    pub message_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub references: Vec<DocumentReference>,
    /// Highest similarity seen during retrieval, if any result came back
    pub confidence_score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_defaults_to_rag() {
        let json = format!(r#"{{"conversation_id":"{}","message":"hi"}}"#, Uuid::nil());
        let request: ChatRequest = serde_json::from_str(&json).unwrap();
        assert!(request.use_rag);
        assert!(request.scope.is_none());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(MessageRole::parse("assistant"), Some(MessageRole::Assistant));
        assert_eq!(MessageRole::parse("bot"), None);
    }
}
