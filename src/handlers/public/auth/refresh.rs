// handlers/public/auth/refresh.rs - POST /auth/refresh handler

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{sign_in_response, start_session, SignInResponse};
use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// POST /auth/refresh - Exchange a refresh token for a new pair
///
/// Expected Input:
/// ```json
/// { "refresh_token": "eyJhbGciOiJIUzI1NiI..." }
/// ```
pub async fn refresh_post(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<(HeaderMap, ApiResponse<SignInResponse>), ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;
    let refresh_token = payload
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::field_error("refresh_token", "refresh_token is required"))?;

    let Some(pair) = state.provider.refresh(refresh_token.trim()).await? else {
        warn!("Refresh token rejected");
        return Err(ApiError::unauthorized("Invalid or expired token"));
    };

    state.identities.ensure_profile(&pair.identity).await?;
    let role = state.identities.get_role(pair.identity.user_id).await?;
    let headers = start_session(&state, &pair.identity);

    info!(user_id = %pair.identity.user_id, "token pair refreshed");
    Ok((headers, ApiResponse::success(sign_in_response(pair, role))))
}
