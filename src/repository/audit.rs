use anyhow::{Context, Result};

use super::CommunityRepository;
use crate::models::AuditEntry;

impl CommunityRepository {
    pub async fn record_audit(&self, entry: &AuditEntry) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO audit_log (action, user_id, target_id, details, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.action)
        .bind(&entry.user_id)
        .bind(&entry.target_id)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to record audit entry")?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent audit entries for a target, newest first.
    pub async fn audit_for_target(&self, target_id: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT id, action, user_id, target_id, details, created_at
             FROM audit_log WHERE target_id = ?
             ORDER BY id DESC LIMIT ?",
        )
        .bind(target_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers;

    #[tokio::test]
    async fn record_and_list_audit() {
        let repo = test_helpers::test_repository().await;

        let id = repo
            .record_audit(
                &AuditEntry::new("MESSAGE_CREATE", "u-1", "m-1")
                    .with_details(serde_json::json!({"channelId": "c-1"})),
            )
            .await
            .unwrap();
        assert!(id > 0);
        repo.record_audit(&AuditEntry::new("MESSAGE_DELETE", "u-2", "m-1"))
            .await
            .unwrap();

        let entries = repo.audit_for_target("m-1", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first
        assert_eq!(entries[0].action, "MESSAGE_DELETE");
        assert_eq!(entries[1].action, "MESSAGE_CREATE");
        assert!(entries[1].details.as_deref().unwrap().contains("c-1"));
    }
}
