// handlers/public/auth/token.rs - POST /auth/token handler

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::{sign_in_response, start_session, SignInResponse};
use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::Identity;
use crate::middleware::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub email: Option<String>,
}

/// POST /auth/token - Development sign-in by email
///
/// Creates the profile on first use (role student) and issues tokens plus a session cookie.
/// Disabled unless `SECURITY_ALLOW_DEV_LOGIN` is set; on by default only in development.
///
/// Expected Input:
/// ```json
/// { "email": "student@campus.test" }
/// ```
///
/// Expected Output:
/// ```json
/// {
///   "success": true,
///   "data": {
///     "access_token": "eyJhbGciOiJIUzI1NiI...",
///     "refresh_token": "eyJhbGciOiJIUzI1NiI...",
///     "expires_in": 3600,
///     "user": { "id": "uuid", "email": "student@campus.test", "role": "student" }
///   }
/// }
/// ```
pub async fn token_post(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<(HeaderMap, ApiResponse<SignInResponse>), ApiError> {
    if !state.config.security.allow_dev_login {
        return Err(ApiError::not_found("Not found"));
    }

    let Json(payload) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;
    let email = payload
        .email
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| e.contains('@') && e.len() > 2)
        .ok_or_else(|| ApiError::field_error("email", "A valid email is required"))?;

    let user_id = match state.identities.find_by_email(&email).await? {
        Some(profile) => profile.id,
        None => Uuid::new_v4(),
    };
    let identity = Identity { user_id, email };
    state.identities.ensure_profile(&identity).await?;

    let pair = state.tokens.issue_pair(&identity)?;
    let role = state.identities.get_role(user_id).await?;
    let headers = start_session(&state, &identity);

    info!(%user_id, "development sign-in");
    Ok((headers, ApiResponse::success(sign_in_response(pair, role))))
}
