//! Message store: append-only per-channel log with read receipts.
//!
//! The read-by set only grows (INSERT OR IGNORE); it shrinks only via
//! cascade when a message is deleted.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;

use super::CommunityRepository;
use crate::models::{Message, MessageView, PublicProfile};

fn row_to_view(row: &sqlx::sqlite::SqliteRow) -> MessageView {
    let read_by: Option<String> = row.get("read_by");
    MessageView {
        id: row.get("id"),
        channel_id: row.get("channel_id"),
        sender: PublicProfile {
            id: row.get("sender_id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            profile_image: row.get("profile_image"),
        },
        content: row.get("content"),
        is_edited: row.get("is_edited"),
        read_by: read_by
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const VIEW_SELECT: &str = r#"
    SELECT m.id, m.channel_id, m.content, m.is_edited, m.created_at, m.updated_at,
           u.id AS sender_id, u.first_name, u.last_name, u.profile_image,
           (SELECT GROUP_CONCAT(user_id) FROM
               (SELECT user_id FROM message_reads WHERE message_id = m.id
                ORDER BY read_at, user_id)) AS read_by
    FROM messages m
    JOIN users u ON u.id = m.sender_id
"#;

impl CommunityRepository {
    /// Persist a message with its read-by set initialized to the sender.
    /// The insert is atomic: either both rows land or neither does.
    pub async fn insert_message(&self, message: &Message) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, channel_id, sender_id, content, is_edited, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.channel_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.is_edited)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert message")?;

        sqlx::query("INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?, ?, ?)")
            .bind(&message.id)
            .bind(&message.sender_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT id, channel_id, sender_id, content, is_edited, created_at, updated_at
             FROM messages WHERE id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    /// A message joined with its sender's public profile and read-by set.
    pub async fn get_message_view(&self, message_id: &str) -> Result<Option<MessageView>> {
        let sql = format!("{} WHERE m.id = ?", VIEW_SELECT);
        let row = sqlx::query(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_view))
    }

    /// Paginated channel history, newest first. `page` is 1-based.
    /// Returns (messages, has_more).
    pub async fn list_messages(
        &self,
        channel_id: &str,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<MessageView>, bool)> {
        let page = page.max(1);
        let offset = (page - 1) * limit;
        // Fetch limit+1 to detect whether there are more pages
        let sql = format!(
            "{} WHERE m.channel_id = ? ORDER BY m.created_at DESC, m.id DESC LIMIT ? OFFSET ?",
            VIEW_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(channel_id)
            .bind(limit + 1)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let has_more = rows.len() as i64 > limit;
        let messages = rows
            .iter()
            .take(limit as usize)
            .map(row_to_view)
            .collect();
        Ok((messages, has_more))
    }

    /// Add `user_id` to the read-by set of every message in the channel not
    /// already containing it. Idempotent. Returns the number of messages
    /// newly marked.
    pub async fn mark_channel_read(&self, user_id: &str, channel_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
             SELECT id, ?, ? FROM messages WHERE channel_id = ?",
        )
        .bind(user_id)
        .bind(Utc::now().timestamp())
        .bind(channel_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn message_read_by(&self, message_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT user_id FROM message_reads WHERE message_id = ? ORDER BY read_at, user_id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Edit a message's content. Only the sender or an admin may edit;
    /// returns None when the message is missing or the actor unauthorized.
    pub async fn update_message(
        &self,
        message_id: &str,
        actor_id: &str,
        actor_is_admin: bool,
        content: &str,
    ) -> Result<Option<Message>> {
        let result = sqlx::query(
            "UPDATE messages SET content = ?, is_edited = 1, updated_at = ?
             WHERE id = ? AND (sender_id = ? OR ?)",
        )
        .bind(content)
        .bind(Utc::now().timestamp())
        .bind(message_id)
        .bind(actor_id)
        .bind(actor_is_admin)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_message(message_id).await
    }

    /// Delete a message. Only the sender or an admin may delete; returns the
    /// removed message (for broadcasting) or None when unauthorized/missing.
    pub async fn delete_message(
        &self,
        message_id: &str,
        actor_id: &str,
        actor_is_admin: bool,
    ) -> Result<Option<Message>> {
        let message = match self.get_message(message_id).await? {
            Some(m) => m,
            None => return Ok(None),
        };
        if message.sender_id != actor_id && !actor_is_admin {
            return Ok(None);
        }

        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(Some(message))
    }
}
