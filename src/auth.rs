//! Authentication: opaque bearer sessions shared by the REST API and the
//! gateway handshake.
//!
//! The middleware resolves `Authorization: Bearer <token>` against the
//! sessions table and stashes an `AuthUser` in request extensions; the
//! extractors below pull it back out. Public routes (health, auth, the
//! WebSocket upgrade, which verifies its own token) pass through.

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::models::{PublicProfile, User, UserRole};
use crate::repository::CommunityRepository;

// =============================================================================
// AuthUser
// =============================================================================

/// Authenticated user, populated from the bearer session by the middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: UserRole,
    pub profile: PublicProfile,
}

impl AuthUser {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            role: user.role,
            profile: user.public_profile(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

// =============================================================================
// Auth Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,
    #[error("Invalid authentication token")]
    InvalidToken,
    #[error("Insufficient permissions")]
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// =============================================================================
// Auth State (shared across middleware and handlers)
// =============================================================================

#[derive(Clone)]
pub struct AuthState {
    pub repository: Arc<CommunityRepository>,
    pub auth_config: Arc<AuthConfig>,
}

// =============================================================================
// Auth Middleware
// =============================================================================

/// Bearer-token middleware for HTTP routes.
///
/// 1. Public routes pass through untouched.
/// 2. A valid token → `AuthUser` in request extensions.
/// 3. Anything else → 401.
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if is_public_route(&path) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return AuthError::MissingToken.into_response();
    };

    match auth_state.repository.get_session_user(token).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(AuthUser::from_user(&user));
            next.run(request).await
        }
        Ok(None) => AuthError::InvalidToken.into_response(),
        Err(e) => {
            warn!("Session lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

fn is_public_route(path: &str) -> bool {
    path == "/health"
        || path == "/metrics"
        || path == "/api/auth/login"
        || path == "/api/auth/register"
        || path == "/api/socket"
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extract AuthUser from request extensions (set by middleware).
/// Returns 401 if not present.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

// =============================================================================
// Auth routes (register / login / logout)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<UserRole>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: User,
}

pub fn auth_routes() -> Router<AuthState> {
    Router::new()
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", post(logout_handler))
}

async fn register_handler(
    State(state): State<AuthState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), (StatusCode, String)> {
    if !state.auth_config.allow_registration {
        return Err((StatusCode::FORBIDDEN, "Registration is closed".to_string()));
    }

    let role = req.role.unwrap_or(UserRole::Donor);
    if role.is_admin() {
        return Err((
            StatusCode::FORBIDDEN,
            "Cannot self-register as admin".to_string(),
        ));
    }

    if req.password.len() < 8 {
        return Err((
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters".to_string(),
        ));
    }

    if state
        .repository
        .get_user_by_email(&req.email)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .is_some()
    {
        return Err((StatusCode::CONFLICT, "Email already registered".to_string()));
    }

    let hash = CommunityRepository::hash_password(&req.password)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let user = User::new(req.first_name, req.last_name, req.email, hash, role);
    state
        .repository
        .create_user(&user)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let session = state
        .repository
        .create_session(&user.id, state.auth_config.session_ttl_secs)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    info!(user = %user.id, "Registered new user");
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            token: session.token,
            user,
        }),
    ))
}

async fn login_handler(
    State(state): State<AuthState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    let user = state
        .repository
        .verify_user_password(&req.email, &req.password)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid email or password".to_string(),
        ))?;

    let session = state
        .repository
        .create_session(&user.id, state.auth_config.session_ttl_secs)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(TokenResponse {
        token: session.token,
        user,
    }))
}

async fn logout_handler(
    State(state): State<AuthState>,
    request: Request<Body>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if let Some(token) = token {
        state
            .repository
            .delete_session(token)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    Ok(Json(serde_json::json!({ "message": "Logged out" })))
}
