//! SQLite message repository implementation.
//!
//! Implements `MessageRepository` from `parley-core` on top of the
//! [`ConnectionPool`]: raw queries, a private Row struct, writes through the
//! pool's busy-retry path.

use chrono::{DateTime, SecondsFormat, Utc};
use parley_core::chat::repository::MessageRepository;
use parley_types::chat::{ChatMessage, MessageRole};
use parley_types::error::{DependencyError, RepositoryError};
use sqlx::Row;
use uuid::Uuid;

use super::pool::{ConnectionPool, classify_sqlx_error};

const CREATE_MESSAGES: &str = r#"CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    token_count INTEGER,
    provider TEXT
)"#;

const CREATE_MESSAGES_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
     ON messages (conversation_id, created_at)";

/// SQLite-backed implementation of `MessageRepository`.
#[derive(Debug, Clone)]
pub struct SqliteMessageRepository {
    pool: ConnectionPool,
}

impl SqliteMessageRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Create the `messages` table and its index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        self.pool
            .write(|mut conn| async move {
                sqlx::query(CREATE_MESSAGES).execute(&mut *conn).await?;
                sqlx::query(CREATE_MESSAGES_INDEX).execute(&mut *conn).await
            })
            .await
            .map_err(to_repository_error)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    created_at: String,
    token_count: Option<i64>,
    provider: Option<String>,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            token_count: row.try_get("token_count")?,
            provider: row.try_get("provider")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation_id: {e}")))?;
        let role: MessageRole = self.role.parse().map_err(RepositoryError::Query)?;

        Ok(ChatMessage {
            id,
            conversation_id,
            role,
            content: self.content,
            created_at: parse_datetime(&self.created_at)?,
            token_count: self.token_count.map(|v| v as u32),
            provider: self.provider,
        })
    }
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime '{s}': {e}")))
}

/// Transient and exhaustion failures stay distinguishable for callers.
fn to_repository_error(err: DependencyError) -> RepositoryError {
    match err {
        DependencyError::Permanent { message, .. } => RepositoryError::Query(message),
        other => RepositoryError::Unavailable(other),
    }
}

impl MessageRepository for SqliteMessageRepository {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), RepositoryError> {
        let id = message.id.to_string();
        let conversation_id = message.conversation_id.to_string();
        let role = message.role.to_string();
        let created_at = format_datetime(&message.created_at);
        let token_count = message.token_count.map(i64::from);

        let (id, conversation_id, role, created_at) = (&id, &conversation_id, &role, &created_at);
        let content = &message.content;
        let provider = &message.provider;
        let result = self
            .pool
            .write(|mut conn| async move {
                sqlx::query(
                    r#"INSERT INTO messages (id, conversation_id, role, content, created_at, token_count, provider)
                       VALUES (?, ?, ?, ?, ?, ?, ?)"#,
                )
                .bind(id)
                .bind(conversation_id)
                .bind(role)
                .bind(content)
                .bind(created_at)
                .bind(token_count)
                .bind(provider)
                .execute(&mut *conn)
                .await
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(DependencyError::Permanent { message, .. }) if message.contains("UNIQUE") => {
                Err(RepositoryError::Conflict(message))
            }
            Err(e) => Err(to_repository_error(e)),
        }
    }

    async fn recent_messages(
        &self,
        conversation_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            r#"SELECT * FROM (
                   SELECT * FROM messages WHERE conversation_id = ?
                   ORDER BY created_at DESC, id DESC LIMIT ?
               ) ORDER BY created_at ASC, id ASC"#,
        )
        .bind(conversation_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| to_repository_error(classify_sqlx_error(&e)))?;
        drop(conn);

        rows.iter()
            .map(|row| {
                MessageRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_message()
            })
            .collect()
    }

    async fn message_count(&self, conversation_id: &Uuid) -> Result<u64, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
            .bind(conversation_id.to_string())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| to_repository_error(classify_sqlx_error(&e)))?;
        Ok(count as u64)
    }
}
