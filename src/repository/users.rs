//! User accounts: argon2-hashed credentials and public profile lookups.

use anyhow::Result;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use super::CommunityRepository;
use crate::models::{PublicProfile, User};

/// Hash a password with Argon2id and a random salt.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored Argon2id hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

impl CommunityRepository {
    pub async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, first_name, last_name, email, password_hash, role, profile_image, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(&user.profile_image)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, first_name, last_name, email, password_hash, role, profile_image, created_at, updated_at
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, first_name, last_name, email, password_hash, role, profile_image, created_at, updated_at
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Verify password against the stored argon2 hash. Returns the User on success.
    pub async fn verify_user_password(&self, email: &str, password: &str) -> Result<Option<User>> {
        let user = match self.get_user_by_email(email).await? {
            Some(u) => u,
            None => return Ok(None),
        };
        if verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    pub async fn get_public_profile(&self, user_id: &str) -> Result<Option<PublicProfile>> {
        let profile = sqlx::query_as::<_, PublicProfile>(
            "SELECT id, first_name, last_name, profile_image FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    /// Hash a password with argon2 for user creation.
    pub fn hash_password(password: &str) -> Result<String> {
        hash_password(password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use crate::repository::test_helpers;

    fn make_user(email: &str, role: UserRole) -> User {
        User::new(
            "Test".into(),
            "User".into(),
            email.into(),
            hash_password("secret").unwrap(),
            role,
        )
    }

    #[test]
    fn hash_and_verify_password() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn same_password_different_salts() {
        let h1 = hash_password("same").unwrap();
        let h2 = hash_password("same").unwrap();
        // Random salt means different hashes
        assert_ne!(h1, h2);
        assert!(verify_password("same", &h1).unwrap());
        assert!(verify_password("same", &h2).unwrap());
    }

    #[tokio::test]
    async fn create_and_get_user() {
        let repo = test_helpers::test_repository().await;
        let user = make_user("alice@example.com", UserRole::Donor);
        repo.create_user(&user).await.unwrap();

        let found = repo.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(found.email, "alice@example.com");
        assert_eq!(found.role, UserRole::Donor);

        let by_email = repo
            .get_user_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let repo = test_helpers::test_repository().await;
        repo.create_user(&make_user("dup@example.com", UserRole::Donor))
            .await
            .unwrap();
        let second = make_user("dup@example.com", UserRole::Soldier);
        assert!(repo.create_user(&second).await.is_err());
    }

    #[tokio::test]
    async fn verify_user_password_paths() {
        let repo = test_helpers::test_repository().await;
        let user = make_user("bob@example.com", UserRole::Soldier);
        repo.create_user(&user).await.unwrap();

        let ok = repo
            .verify_user_password("bob@example.com", "secret")
            .await
            .unwrap();
        assert!(ok.is_some());

        let fail = repo
            .verify_user_password("bob@example.com", "wrong")
            .await
            .unwrap();
        assert!(fail.is_none());

        let missing = repo.verify_user_password("nobody@example.com", "x").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn public_profile_fields_only() {
        let repo = test_helpers::test_repository().await;
        let user = make_user("carol@example.com", UserRole::Municipality);
        repo.create_user(&user).await.unwrap();

        let profile = repo.get_public_profile(&user.id).await.unwrap().unwrap();
        assert_eq!(profile.first_name, "Test");
        assert_eq!(profile.last_name, "User");
        assert_eq!(profile.id, user.id);
    }
}
