//! MessageRepository trait definition.
//!
//! Follows the RPITIT pattern used by `LlmProvider`.

use parley_types::chat::ChatMessage;
use parley_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for conversation message persistence.
///
/// Implementations live in parley-infra (`SqliteMessageRepository`).
/// Transient store failures (busy/locked past the retry budget, pool
/// exhaustion) surface as `RepositoryError::Unavailable`.
pub trait MessageRepository: Send + Sync {
    /// Save a new message.
    fn save_message(
        &self,
        message: &ChatMessage,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The most recent `limit` messages of a conversation, ordered by
    /// created_at ASC.
    fn recent_messages(
        &self,
        conversation_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send;

    /// Total number of messages in a conversation.
    fn message_count(
        &self,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
