use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account roles carried by every user. Admins may edit or delete any
/// message; municipality accounts may push city-scoped events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Soldier,
    Municipality,
    Donor,
    Organization,
    Business,
}

impl UserRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: UserRole,
    pub profile_image: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn new(
        first_name: String,
        last_name: String,
        email: String,
        password_hash: String,
        role: UserRole,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            first_name,
            last_name,
            email,
            password_hash,
            role,
            profile_image: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            profile_image: self.profile_image.clone(),
        }
    }
}

/// The subset of a user that is safe to put on the wire. Credentials and
/// contact details never leave the server.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_image: Option<String>,
}

/// Opaque bearer session, the backing store of the identity verifier.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ChannelKind {
    Direct,
    Group,
    Event,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    /// Bound external resource (e.g. a community event) for `Event` channels.
    pub event_id: Option<String>,
    pub is_public: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Channel {
    pub fn new(name: String, kind: ChannelKind) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            kind,
            event_id: None,
            is_public: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_event_id(mut self, event_id: String) -> Self {
        self.event_id = Some(event_id);
        self
    }
}

/// Maximum message content length, matching the durable store's bound.
pub const MAX_MESSAGE_LEN: usize = 5000;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub content: String,
    pub is_edited: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Message {
    pub fn new(channel_id: String, sender_id: String, content: String) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id,
            sender_id,
            content,
            is_edited: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A message joined with its sender's public profile and read-by set,
/// as returned by the history endpoint and broadcast on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub channel_id: String,
    pub sender: PublicProfile,
    pub content: String,
    pub is_edited: bool,
    pub read_by: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Flat audit trail entry written by REST mutations.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Option<i64>,
    pub action: String,
    pub user_id: String,
    pub target_id: String,
    pub details: Option<String>,
    pub created_at: i64,
}

impl AuditEntry {
    pub fn new(action: &str, user_id: &str, target_id: &str) -> Self {
        Self {
            id: None,
            action: action.to_string(),
            user_id: user_id.to_string(),
            target_id: target_id.to_string(),
            details: None,
            created_at: Utc::now().timestamp(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details.to_string());
        self
    }
}
