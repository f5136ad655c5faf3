//! Channel store: durable channels and their member sets.
//!
//! The member set is the sole authority for who may read or write a
//! channel's messages.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;

use super::CommunityRepository;
use crate::models::{Channel, PublicProfile};

impl CommunityRepository {
    /// Create a channel with an initial member set. The creator is always
    /// included, and duplicate ids collapse to one membership row.
    pub async fn create_channel(
        &self,
        channel: &Channel,
        creator_id: &str,
        member_ids: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO channels (id, name, kind, event_id, is_public, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&channel.id)
        .bind(&channel.name)
        .bind(channel.kind)
        .bind(&channel.event_id)
        .bind(channel.is_public)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create channel")?;

        let mut members: HashSet<&str> = member_ids.iter().map(String::as_str).collect();
        members.insert(creator_id);
        for user_id in members {
            sqlx::query(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?, ?, ?)",
            )
            .bind(&channel.id)
            .bind(user_id)
            .bind(channel.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(
            "SELECT id, name, kind, event_id, is_public, created_at, updated_at
             FROM channels WHERE id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }

    /// The membership check used by the message pipeline.
    pub async fn is_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM channel_members WHERE channel_id = ? AND user_id = ?",
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn channel_member_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT user_id FROM channel_members WHERE channel_id = ? ORDER BY joined_at, user_id",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Public profiles of a channel's members, in join order.
    pub async fn channel_member_profiles(
        &self,
        channel_id: &str,
    ) -> Result<Vec<PublicProfile>> {
        let profiles = sqlx::query_as::<_, PublicProfile>(
            r#"
            SELECT u.id, u.first_name, u.last_name, u.profile_image
            FROM channel_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.channel_id = ?
            ORDER BY m.joined_at, u.id
            "#,
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(profiles)
    }

    /// All channels the user is a member of, most recently updated first.
    pub async fn channels_for_user(&self, user_id: &str) -> Result<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            r#"
            SELECT c.id, c.name, c.kind, c.event_id, c.is_public, c.created_at, c.updated_at
            FROM channels c
            JOIN channel_members m ON m.channel_id = c.id
            WHERE m.user_id = ?
            ORDER BY c.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    /// Add members to a channel; already-present ids are ignored.
    /// Returns the ids that were actually added.
    pub async fn add_channel_members(
        &self,
        channel_id: &str,
        member_ids: &[String],
    ) -> Result<Vec<String>> {
        let now = Utc::now().timestamp();
        let mut added = Vec::new();
        let mut tx = self.pool.begin().await?;

        for user_id in member_ids {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?, ?, ?)",
            )
            .bind(channel_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                added.push(user_id.clone());
            }
        }

        sqlx::query("UPDATE channels SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(added)
    }

    /// Remove a member. Returns false if the user was not a member.
    pub async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM channel_members WHERE channel_id = ? AND user_id = ?")
                .bind(channel_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() > 0 {
            sqlx::query("UPDATE channels SET updated_at = ? WHERE id = ?")
                .bind(Utc::now().timestamp())
                .bind(channel_id)
                .execute(&self.pool)
                .await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Rename a channel and/or flip its visibility. Returns the updated row.
    pub async fn update_channel(
        &self,
        channel_id: &str,
        name: Option<&str>,
        is_public: Option<bool>,
    ) -> Result<Option<Channel>> {
        let current = match self.get_channel(channel_id).await? {
            Some(c) => c,
            None => return Ok(None),
        };

        sqlx::query("UPDATE channels SET name = ?, is_public = ?, updated_at = ? WHERE id = ?")
            .bind(name.unwrap_or(&current.name))
            .bind(is_public.unwrap_or(current.is_public))
            .bind(Utc::now().timestamp())
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        self.get_channel(channel_id).await
    }

    /// Delete a channel. Membership rows and messages cascade.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
