//! Prompt construction and chat orchestration

pub mod chat;
pub mod prompt;

pub use chat::{ChatOrchestrator, ChatStream};
pub use prompt::{PromptBuilder, INSUFFICIENT_CONTEXT_REPLY, NO_CONTEXT_MESSAGE};
