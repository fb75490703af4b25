//! Chat message types for Parley.
//!
//! Messages are persisted per conversation and ordered by `created_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::llm::MessageRole;

use crate::llm::Message;

/// A single persisted message within a conversation.
///
/// Assistant messages carry the token count and the provider that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub token_count: Option<u32>,
    pub provider: Option<String>,
}

impl ChatMessage {
    /// Create a new user message stamped with the current time.
    pub fn user(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            conversation_id,
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
            token_count: None,
            provider: None,
        }
    }

    /// Create a new assistant reply stamped with the current time.
    pub fn assistant(
        conversation_id: Uuid,
        content: impl Into<String>,
        token_count: u32,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            conversation_id,
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            token_count: Some(token_count),
            provider: Some(provider.into()),
        }
    }

    /// The provider-facing view of this message.
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Result of sending a message: both sides of the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatExchange {
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
    /// Set when the reply came from the alternate backend.
    pub failover_warning: Option<String>,
}
