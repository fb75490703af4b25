//! Chat service: persist, generate, persist.
//!
//! `ChatService` is sequential glue over the resilience substrate. Recent
//! history is read through the shared cache under
//! `conversation:{id}:messages`; that key is invalidated after every write
//! so a reply is never generated from stale history.
//!
//! Concurrent sends for the same conversation are not serialized here.

use std::sync::Arc;

use parley_types::chat::{ChatExchange, ChatMessage};
use parley_types::error::{DependencyError, RepositoryError, SERVICE_UNAVAILABLE_MESSAGE};
use parley_types::llm::{ContentClass, GenerateOptions};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::chat::repository::MessageRepository;
use crate::llm::selector::{GenerateRequest, ProviderSelector};

/// Number of prior messages sent to the provider as context.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

/// Errors surfaced by [`ChatService`].
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message content is empty")]
    EmptyMessage,

    #[error("message store error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("generation failed: {0}")]
    Generation(#[from] DependencyError),
}

impl ChatError {
    /// Text safe to show an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ChatError::EmptyMessage => "Message cannot be empty.",
            ChatError::Repository(RepositoryError::Unavailable(e)) => e.user_message(),
            ChatError::Repository(_) => SERVICE_UNAVAILABLE_MESSAGE,
            ChatError::Generation(e) => e.user_message(),
        }
    }
}

/// Cache key for a conversation's recent history.
pub fn history_cache_key(conversation_id: &Uuid) -> String {
    format!("conversation:{conversation_id}:messages")
}

/// Orchestrates one chat exchange.
///
/// Generic over `MessageRepository` so parley-core never depends on
/// parley-infra.
pub struct ChatService<R: MessageRepository> {
    repo: R,
    selector: Arc<ProviderSelector>,
    history_cache: Arc<TtlCache<Vec<ChatMessage>>>,
    history_limit: u32,
    options: GenerateOptions,
}

impl<R: MessageRepository> ChatService<R> {
    pub fn new(
        repo: R,
        selector: Arc<ProviderSelector>,
        history_cache: Arc<TtlCache<Vec<ChatMessage>>>,
    ) -> Self {
        Self {
            repo,
            selector,
            history_cache,
            history_limit: DEFAULT_HISTORY_LIMIT,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Generation options (system prompt, temperature) applied to every call.
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }

    /// Persist `content`, generate a reply from recent history, persist the
    /// reply.
    ///
    /// If generation fails the user message stays stored and no assistant
    /// message is written.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        content_class: ContentClass,
    ) -> Result<ChatExchange, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let user_message = ChatMessage::user(conversation_id, content);
        self.repo.save_message(&user_message).await?;
        self.invalidate_history(&conversation_id);

        let history = self.history(&conversation_id).await?;
        let request = GenerateRequest::new(history.iter().map(ChatMessage::to_message).collect())
            .with_options(self.options.clone())
            .with_content_class(content_class);

        let generation = match self.selector.generate(&request).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "reply generation failed");
                return Err(e.into());
            }
        };

        let assistant_message = ChatMessage::assistant(
            conversation_id,
            generation.text,
            generation.token_count,
            generation.provider,
        );
        self.repo.save_message(&assistant_message).await?;
        self.invalidate_history(&conversation_id);

        info!(
            conversation_id = %conversation_id,
            provider = assistant_message.provider.as_deref().unwrap_or_default(),
            tokens = generation.token_count,
            fell_back = generation.fell_back,
            "chat exchange completed"
        );

        Ok(ChatExchange {
            user_message,
            assistant_message,
            failover_warning: generation.failover_warning,
        })
    }

    /// Recent messages of a conversation, oldest first, served from the
    /// cache when fresh.
    pub async fn history(&self, conversation_id: &Uuid) -> Result<Vec<ChatMessage>, ChatError> {
        let key = history_cache_key(conversation_id);
        let messages = self
            .history_cache
            .get_or_try_insert_with(&key, None, || {
                self.repo.recent_messages(conversation_id, self.history_limit)
            })
            .await?;
        Ok(messages)
    }

    pub async fn message_count(&self, conversation_id: &Uuid) -> Result<u64, ChatError> {
        Ok(self.repo.message_count(conversation_id).await?)
    }

    fn invalidate_history(&self, conversation_id: &Uuid) {
        self.history_cache
            .invalidate(&history_cache_key(conversation_id));
    }
}
