//! Opaque bearer sessions backing the identity verifier.
//!
//! Both the REST middleware and the gateway handshake resolve tokens here.

use anyhow::Result;
use chrono::Utc;
use rand::RngCore;

use super::CommunityRepository;
use crate::models::{Session, User};

/// Generate an opaque 256-bit session token, hex-encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl CommunityRepository {
    /// Issue a new session for a user. Returns the session with its token.
    pub async fn create_session(&self, user_id: &str, ttl_secs: u64) -> Result<Session> {
        let now = Utc::now().timestamp();
        let session = Session {
            token: generate_token(),
            user_id: user_id.to_string(),
            expires_at: now + ttl_secs as i64,
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    /// Resolve a bearer token to its user. Expired or unknown tokens resolve
    /// to None; the caller decides how to report the rejection.
    pub async fn get_session_user(&self, token: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.first_name, u.last_name, u.email, u.password_hash,
                   u.role, u.profile_image, u.created_at, u.updated_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = ? AND s.expires_at > ?
            "#,
        )
        .bind(token)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn delete_session(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove expired sessions. Returns the number of rows deleted.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use crate::repository::test_helpers;

    async fn seed_user(repo: &CommunityRepository, email: &str) -> User {
        let user = User::new(
            "Test".into(),
            "User".into(),
            email.into(),
            CommunityRepository::hash_password("pw").unwrap(),
            UserRole::Donor,
        );
        repo.create_user(&user).await.unwrap();
        user
    }

    #[test]
    fn tokens_are_unique_and_hex() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
        assert_eq!(t1.len(), 64);
        assert!(t1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn create_and_resolve_session() {
        let repo = test_helpers::test_repository().await;
        let user = seed_user(&repo, "alice@example.com").await;

        let session = repo.create_session(&user.id, 3600).await.unwrap();
        let resolved = repo
            .get_session_user(&session.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn unknown_token_rejected() {
        let repo = test_helpers::test_repository().await;
        let resolved = repo.get_session_user("not-a-token").await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn expired_session_rejected() {
        let repo = test_helpers::test_repository().await;
        let user = seed_user(&repo, "bob@example.com").await;

        let session = repo.create_session(&user.id, 3600).await.unwrap();
        // Push the expiry into the past
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE token = ?")
            .bind(Utc::now().timestamp() - 10)
            .bind(&session.token)
            .execute(&repo.pool)
            .await
            .unwrap();

        assert!(repo.get_session_user(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_session_revokes() {
        let repo = test_helpers::test_repository().await;
        let user = seed_user(&repo, "carol@example.com").await;

        let session = repo.create_session(&user.id, 3600).await.unwrap();
        assert!(repo.delete_session(&session.token).await.unwrap());
        assert!(repo.get_session_user(&session.token).await.unwrap().is_none());
        // Second delete is a no-op
        assert!(!repo.delete_session(&session.token).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired() {
        let repo = test_helpers::test_repository().await;
        let user = seed_user(&repo, "dave@example.com").await;

        let live = repo.create_session(&user.id, 3600).await.unwrap();
        let stale = repo.create_session(&user.id, 3600).await.unwrap();
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE token = ?")
            .bind(Utc::now().timestamp() - 10)
            .bind(&stale.token)
            .execute(&repo.pool)
            .await
            .unwrap();

        let removed = repo.cleanup_expired_sessions().await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get_session_user(&live.token).await.unwrap().is_some());
    }
}
