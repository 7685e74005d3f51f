
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::models::{NewMessage, StoredMessage};

pub struct MessageQueries;

impl MessageQueries {
    #[inline]
    pub async fn append(pool: &SqlitePool, message: NewMessage) -> Result<StoredMessage> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO chat_messages (conversation_id, role, content, created_date) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&message.conversation_id)
        .bind(message.role)
        .bind(&message.content)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to append chat message")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve appended chat message"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<StoredMessage>> {
        sqlx::query_as::<_, StoredMessage>(
            "SELECT id, conversation_id, role, content, created_date \
             FROM chat_messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chat message by id")
    }

    /// Fetch the most recent `window` messages of a conversation, oldest
    /// first
    #[inline]
    pub async fn recent(
        pool: &SqlitePool,
        conversation_id: &str,
        window: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut messages = sqlx::query_as::<_, StoredMessage>(
            "SELECT id, conversation_id, role, content, created_date \
             FROM chat_messages WHERE conversation_id = ? \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(i64::from(window))
        .fetch_all(pool)
        .await
        .context("Failed to load recent chat messages")?;

        messages.reverse();
        debug!(
            conversation_id,
            count = messages.len(),
            "Loaded conversation window"
        );
        Ok(messages)
    }

    #[inline]
    pub async fn delete_conversation(pool: &SqlitePool, conversation_id: &str) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM chat_messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(pool)
            .await
            .context("Failed to delete conversation")?
            .rows_affected();

        debug!(conversation_id, deleted, "Deleted conversation messages");
        Ok(deleted)
    }
}
