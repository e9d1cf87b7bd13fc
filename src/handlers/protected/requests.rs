use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::require_identified;
use crate::app::AppState;
use crate::database::models::{AdminRequest, ReviewDecision};
use crate::error::ApiError;
use crate::identity::Caller;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Default, Deserialize)]
pub struct SubmitBody {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewBody {
    pub id: Option<Uuid>,
    pub action: Option<String>,
}

/// POST /api/requests - Ask for admin elevation
///
/// Expected Input:
/// ```json
/// { "reason": "I coordinate the robotics club" }
/// ```
///
/// 201 with the pending request; 400 when the reason is missing or a request is already pending.
pub async fn submit(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<SubmitBody>, JsonRejection>,
) -> ApiResult<AdminRequest> {
    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let reason = body.reason.unwrap_or_default();

    let request = state.workflow.submit(&caller, &reason).await?;
    Ok(ApiResponse::created(request))
}

/// GET /api/requests - Admins see every request, everyone else their own. Newest first.
pub async fn list(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> ApiResult<Vec<AdminRequest>> {
    let requests = state.workflow.list(&caller).await?;
    Ok(ApiResponse::success(requests))
}

/// PATCH /api/requests - Approve or deny a pending request
///
/// Expected Input:
/// ```json
/// { "id": "request uuid", "action": "approve" }
/// ```
pub async fn review(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<ReviewBody>, JsonRejection>,
) -> ApiResult<AdminRequest> {
    require_identified(&caller)?;

    let Json(body) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;
    let id = body.id.ok_or_else(|| ApiError::field_error("id", "Request id is required"))?;
    let decision = body
        .action
        .as_deref()
        .unwrap_or_default()
        .parse::<ReviewDecision>()
        .map_err(|e| ApiError::field_error("action", e.to_string()))?;

    let request = state.workflow.review(&caller, id, decision).await?;
    Ok(ApiResponse::success(request))
}
