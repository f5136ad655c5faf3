//! Presence lookups and fire-and-forget notifications pushed by REST
//! collaborators: typing indicators and city-scoped domain events.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::collections::HashMap;

use crate::AppState;
use crate::auth::AuthUser;
use crate::models::UserRole;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatusQuery {
    /// Comma-separated user ids
    pub user_ids: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub is_typing: bool,
}

/// City-scoped events pushed by the donation/matching controllers after
/// they mutate their own durable state (which lives outside this service).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CityEventRequest {
    NewDonation {
        donation: serde_json::Value,
    },
    DonationAssignment {
        #[serde(rename = "donationId")]
        donation_id: String,
        #[serde(rename = "soldierId")]
        soldier_id: String,
    },
    DonationStatusUpdate {
        #[serde(rename = "donationId")]
        donation_id: String,
        status: String,
    },
    MatchingUpdate {
        update: serde_json::Value,
    },
}

type ApiError = (StatusCode, String);

/// Presence lookup, e.g. "is the assigned recipient online".
pub async fn get_online_status(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<OnlineStatusQuery>,
) -> Result<Json<HashMap<String, bool>>, ApiError> {
    let user_ids: Vec<String> = query
        .user_ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if user_ids.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "userIds is required".to_string()));
    }

    Ok(Json(state.gateway.online_status(&user_ids).await))
}

/// Relay a typing indicator to the channel room.
pub async fn typing_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel_id): Path<String>,
    Json(req): Json<TypingRequest>,
) -> Result<StatusCode, ApiError> {
    let is_member = state
        .repository
        .is_channel_member(&channel_id, &user.user_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !is_member {
        return Err((
            StatusCode::FORBIDDEN,
            "Not a member of this channel".to_string(),
        ));
    }

    state
        .gateway
        .typing_status(&channel_id, &user.user_id, req.is_typing)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Push a city-scoped event to every connection subscribed to the city
/// room. Restricted to admin and municipality accounts.
pub async fn city_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(city_id): Path<String>,
    Json(event): Json<CityEventRequest>,
) -> Result<StatusCode, ApiError> {
    if !matches!(user.role, UserRole::Admin | UserRole::Municipality) {
        return Err((
            StatusCode::FORBIDDEN,
            "Insufficient permissions".to_string(),
        ));
    }

    match event {
        CityEventRequest::NewDonation { donation } => {
            state.gateway.new_donation(&city_id, donation).await;
        }
        CityEventRequest::DonationAssignment {
            donation_id,
            soldier_id,
        } => {
            state
                .gateway
                .donation_assignment(&city_id, &donation_id, &soldier_id)
                .await;
            // The assigned recipient also hears about it directly, without
            // having to watch the city scope
            state
                .gateway
                .notify_user(
                    &soldier_id,
                    crate::gateway::ServerEvent::DonationAssignment {
                        donation_id,
                        soldier_id: soldier_id.clone(),
                    },
                )
                .await;
        }
        CityEventRequest::DonationStatusUpdate {
            donation_id,
            status,
        } => {
            state
                .gateway
                .donation_status_update(&city_id, &donation_id, &status)
                .await;
        }
        CityEventRequest::MatchingUpdate { update } => {
            state.gateway.city_matching_update(&city_id, update).await;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn city_event_deserializes_tagged_variants() {
        let event: CityEventRequest = serde_json::from_str(
            r#"{"type": "donation_assignment", "donationId": "d1", "soldierId": "s1"}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            CityEventRequest::DonationAssignment { ref donation_id, ref soldier_id }
                if donation_id == "d1" && soldier_id == "s1"
        ));

        let event: CityEventRequest =
            serde_json::from_str(r#"{"type": "new_donation", "donation": {"id": "d2"}}"#).unwrap();
        assert!(matches!(event, CityEventRequest::NewDonation { .. }));
    }
}
