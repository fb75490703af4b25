//! Chat commands: send one message, print conversation history.

use anyhow::Result;
use console::style;
use uuid::Uuid;

use parley_core::chat::repository::MessageRepository;
use parley_infra::sqlite::message::SqliteMessageRepository;
use parley_types::chat::{ChatMessage, MessageRole};
use parley_types::llm::ContentClass;

use crate::state::AppState;

/// Send `message` and print the reply.
///
/// Failures print the generic user-facing message only; the detailed cause
/// is in the logs.
pub async fn send(
    state: &AppState,
    message: &str,
    conversation: Option<Uuid>,
    restricted: bool,
    json: bool,
) -> Result<()> {
    let conversation_id = conversation.unwrap_or_else(Uuid::now_v7);
    let content_class = if restricted {
        ContentClass::Restricted
    } else {
        ContentClass::Standard
    };

    let exchange = state
        .chat_service
        .send_message(conversation_id, message, content_class)
        .await
        .map_err(|e| {
            tracing::debug!(conversation_id = %conversation_id, error = %e, "chat request failed");
            anyhow::Error::msg(e.user_message())
        })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&exchange)?);
        return Ok(());
    }

    if let Some(warning) = &exchange.failover_warning {
        println!("  {} {}", style("!").yellow().bold(), style(warning).yellow());
    }
    println!();
    println!("{}", exchange.assistant_message.content);
    println!();
    println!(
        "  {}",
        style(format!(
            "{} · {} tokens · conversation {}",
            exchange.assistant_message.provider.as_deref().unwrap_or("-"),
            exchange.assistant_message.token_count.unwrap_or_default(),
            conversation_id
        ))
        .dim()
    );
    Ok(())
}

/// Print the last `limit` messages of a conversation, oldest first.
pub async fn history(
    repo: &SqliteMessageRepository,
    conversation_id: Uuid,
    limit: u32,
    json: bool,
) -> Result<()> {
    let messages = repo.recent_messages(&conversation_id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!(
            "  {}",
            style(format!("No messages in conversation {conversation_id}")).dim()
        );
        return Ok(());
    }

    let total = repo.message_count(&conversation_id).await?;
    println!();
    for message in &messages {
        println!("{}", render_message(message));
        println!();
    }
    println!(
        "  {}",
        style(format!("showing {} of {} messages", messages.len(), total)).dim()
    );
    Ok(())
}

fn render_message(message: &ChatMessage) -> String {
    let timestamp = message.created_at.format("%Y-%m-%d %H:%M:%S");
    let label = match message.role {
        MessageRole::User => style("you").cyan().bold(),
        MessageRole::Assistant => style("assistant").green().bold(),
        MessageRole::System => style("system").dim(),
    };
    let meta = match &message.provider {
        Some(provider) => format!("{timestamp} · {provider}"),
        None => timestamp.to_string(),
    };
    format!("  {label} {}\n  {}", style(meta).dim(), message.content)
}
