//! Message REST handlers — the durable path of the messaging core.
//!
//! A client that is offline still sees history through these endpoints;
//! the live broadcast is a convergence optimization, not the source of
//! truth.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::AuthUser;
use crate::gateway::GatewayError;
use crate::models::{AuditEntry, MessageView};

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    pub pagination: Pagination,
}

type ApiError = (StatusCode, String);

fn internal(e: impl ToString) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn gateway_error(err: GatewayError) -> ApiError {
    let status = match &err {
        GatewayError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        GatewayError::NotAMember => StatusCode::FORBIDDEN,
        GatewayError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        GatewayError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Create a message over REST. Shares the pipeline with the live path, so
/// the membership gate, persistence and broadcast behave identically.
pub async fn create_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel_id): Path<String>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let view = state
        .gateway
        .pipeline
        .send_as_user(&user.user_id, &channel_id, &req.content)
        .await
        .map_err(gateway_error)?;

    state
        .repository
        .record_audit(
            &AuditEntry::new("MESSAGE_CREATE", &user.user_id, &view.id)
                .with_details(serde_json::json!({ "channelId": channel_id })),
        )
        .await
        .map_err(internal)?;

    Ok((StatusCode::CREATED, Json(view)))
}

/// Paginated channel history, newest first. Fetching history marks the
/// whole channel read for the caller.
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let is_member = state
        .repository
        .is_channel_member(&channel_id, &user.user_id)
        .await
        .map_err(internal)?;
    if !is_member {
        return Err((
            StatusCode::FORBIDDEN,
            "Not a member of this channel".to_string(),
        ));
    }

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(50).clamp(1, 100);

    let (messages, has_more) = state
        .repository
        .list_messages(&channel_id, page, limit)
        .await
        .map_err(internal)?;

    state
        .gateway
        .pipeline
        .mark_read(&user.user_id, &channel_id)
        .await
        .map_err(gateway_error)?;

    Ok(Json(MessagePage {
        messages,
        pagination: Pagination {
            page,
            limit,
            has_more,
        },
    }))
}

/// Edit a message's content. Sender or admin only; sets the edited flag
/// and pushes `message_update` to the channel room.
pub async fn update_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<String>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<Json<MessageView>, ApiError> {
    let updated = state
        .repository
        .update_message(&message_id, &user.user_id, user.is_admin(), &req.content)
        .await
        .map_err(internal)?
        .ok_or((
            StatusCode::FORBIDDEN,
            "Message not found or not authorized to update".to_string(),
        ))?;

    state
        .repository
        .record_audit(&AuditEntry::new("MESSAGE_UPDATE", &user.user_id, &message_id))
        .await
        .map_err(internal)?;

    let view = state
        .repository
        .get_message_view(&message_id)
        .await
        .map_err(internal)?
        .ok_or(internal("message vanished after update"))?;

    state
        .gateway
        .message_updated(
            &updated.channel_id,
            &message_id,
            serde_json::to_value(&view).map_err(internal)?,
        )
        .await;

    Ok(Json(view))
}

/// Delete a message. Sender or admin only; pushes `message_delete` to the
/// channel room after the row is gone.
pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .repository
        .delete_message(&message_id, &user.user_id, user.is_admin())
        .await
        .map_err(internal)?
        .ok_or((
            StatusCode::FORBIDDEN,
            "Message not found or not authorized to delete".to_string(),
        ))?;

    state
        .repository
        .record_audit(&AuditEntry::new("MESSAGE_DELETE", &user.user_id, &message_id))
        .await
        .map_err(internal)?;

    state
        .gateway
        .message_deleted(&deleted.channel_id, &message_id)
        .await;

    Ok(Json(serde_json::json!({
        "message": "Message deleted successfully"
    })))
}
