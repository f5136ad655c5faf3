//! Channel REST handlers
//!
//! Mutations go through the channel store first, then notify live clients
//! through the gateway's broadcast API.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::AuthUser;
use crate::models::{AuditEntry, Channel, ChannelKind, PublicProfile};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub kind: Option<ChannelKind>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AddMembersRequest {
    pub members: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChannelWithMembers {
    #[serde(flatten)]
    pub channel: Channel,
    pub members: Vec<PublicProfile>,
}

type ApiError = (StatusCode, String);

fn internal(e: impl ToString) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Membership gate shared by the mutating handlers: the channel must exist
/// and the actor must be in its member set (admins pass regardless).
async fn require_channel_access(
    state: &AppState,
    channel_id: &str,
    user: &AuthUser,
) -> Result<Channel, ApiError> {
    let channel = state
        .repository
        .get_channel(channel_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Channel not found".to_string()))?;

    let is_member = state
        .repository
        .is_channel_member(channel_id, &user.user_id)
        .await
        .map_err(internal)?;
    if !is_member && !user.is_admin() {
        return Err((
            StatusCode::FORBIDDEN,
            "Not a member of this channel".to_string(),
        ));
    }
    Ok(channel)
}

async fn channel_with_members(
    state: &AppState,
    channel: Channel,
) -> Result<ChannelWithMembers, ApiError> {
    let members = state
        .repository
        .channel_member_profiles(&channel.id)
        .await
        .map_err(internal)?;
    Ok(ChannelWithMembers { channel, members })
}

pub async fn create_channel(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ChannelWithMembers>), ApiError> {
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Channel name is required".into()));
    }

    let mut channel = Channel::new(req.name, req.kind.unwrap_or(ChannelKind::Group));
    channel.event_id = req.event_id;
    channel.is_public = req.is_public.unwrap_or(false);

    state
        .repository
        .create_channel(&channel, &user.user_id, &req.members)
        .await
        .map_err(internal)?;

    state
        .repository
        .record_audit(
            &AuditEntry::new("CHANNEL_CREATE", &user.user_id, &channel.id)
                .with_details(serde_json::json!({ "kind": channel.kind })),
        )
        .await
        .map_err(internal)?;

    let response = channel_with_members(&state, channel).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_channel(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel_id): Path<String>,
) -> Result<Json<ChannelWithMembers>, ApiError> {
    let channel = require_channel_access(&state, &channel_id, &user).await?;
    channel_with_members(&state, channel).await.map(Json)
}

pub async fn list_channels(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let channels = state
        .repository
        .channels_for_user(&user.user_id)
        .await
        .map_err(internal)?;
    Ok(Json(channels))
}

pub async fn update_channel(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel_id): Path<String>,
    Json(req): Json<UpdateChannelRequest>,
) -> Result<Json<ChannelWithMembers>, ApiError> {
    require_channel_access(&state, &channel_id, &user).await?;

    let updated = state
        .repository
        .update_channel(&channel_id, req.name.as_deref(), req.is_public)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Channel not found".to_string()))?;

    state
        .repository
        .record_audit(&AuditEntry::new("CHANNEL_UPDATE", &user.user_id, &channel_id))
        .await
        .map_err(internal)?;

    state
        .gateway
        .channel_updated(
            &channel_id,
            serde_json::to_value(&updated).map_err(internal)?,
        )
        .await;

    channel_with_members(&state, updated).await.map(Json)
}

pub async fn add_members(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel_id): Path<String>,
    Json(req): Json<AddMembersRequest>,
) -> Result<Json<ChannelWithMembers>, ApiError> {
    let channel = require_channel_access(&state, &channel_id, &user).await?;

    let added = state
        .repository
        .add_channel_members(&channel_id, &req.members)
        .await
        .map_err(internal)?;

    state
        .repository
        .record_audit(
            &AuditEntry::new("CHANNEL_ADD_MEMBERS", &user.user_id, &channel_id)
                .with_details(serde_json::json!({ "addedMembers": added })),
        )
        .await
        .map_err(internal)?;

    // Notify subscribers about each member that actually joined
    for user_id in &added {
        if let Some(profile) = state
            .repository
            .get_public_profile(user_id)
            .await
            .map_err(internal)?
        {
            state.gateway.member_joined(&channel_id, profile).await;
        }
    }

    channel_with_members(&state, channel).await.map(Json)
}

pub async fn remove_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path((channel_id, member_id)): Path<(String, String)>,
) -> Result<Json<ChannelWithMembers>, ApiError> {
    let channel = require_channel_access(&state, &channel_id, &user).await?;

    let removed = state
        .repository
        .remove_channel_member(&channel_id, &member_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err((StatusCode::NOT_FOUND, "Member not found".to_string()));
    }

    state
        .repository
        .record_audit(
            &AuditEntry::new("CHANNEL_REMOVE_MEMBER", &user.user_id, &channel_id)
                .with_details(serde_json::json!({ "removedMember": member_id })),
        )
        .await
        .map_err(internal)?;

    // Announce and evict the removed user's live connections from the room
    state.gateway.member_left(&channel_id, &member_id).await;

    channel_with_members(&state, channel).await.map(Json)
}

pub async fn delete_channel(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_channel_access(&state, &channel_id, &user).await?;

    if !state
        .repository
        .delete_channel(&channel_id)
        .await
        .map_err(internal)?
    {
        return Err((StatusCode::NOT_FOUND, "Channel not found".to_string()));
    }

    state
        .repository
        .record_audit(&AuditEntry::new("CHANNEL_DELETE", &user.user_id, &channel_id))
        .await
        .map_err(internal)?;

    state
        .gateway
        .channel_updated(
            &channel_id,
            serde_json::json!({ "id": channel_id, "deleted": true }),
        )
        .await;

    Ok(Json(serde_json::json!({
        "message": "Channel deleted successfully"
    })))
}
