//! Conversation history storage trait

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Conversation, ConversationMessage};

/// Append-only conversation log
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Append a turn; fails with `NotFound` for an unknown conversation
    async fn add_message(&self, message: &ConversationMessage) -> Result<()>;

    /// Turns in insertion order
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<ConversationMessage>>;
}
