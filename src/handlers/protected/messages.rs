use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Query, State,
    },
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::require_identified;
use crate::app::AppState;
use crate::database::models::Message;
use crate::error::ApiError;
use crate::identity::Caller;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub group_id: Option<Uuid>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub group_id: Option<Uuid>,
    /// Only messages with a greater `seq`
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

/// POST /api/messages - Post to a group you belong to
///
/// Expected Input:
/// ```json
/// { "group_id": "uuid", "content": "hello" }
/// ```
///
/// 201 with the committed message (including its `seq`); 403 for non-members.
pub async fn send(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<SendBody>, JsonRejection>,
) -> ApiResult<Message> {
    require_identified(&caller)?;
    let Json(body) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;
    let group_id = body
        .group_id
        .ok_or_else(|| ApiError::field_error("group_id", "group_id is required"))?;

    let message = state
        .bus
        .post(&caller, group_id, body.content.as_deref().unwrap_or_default())
        .await?;
    Ok(ApiResponse::created(message))
}

/// GET /api/messages?group_id=&since=&limit= - Group history in `seq` order (members only)
pub async fn history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Vec<Message>> {
    require_identified(&caller)?;
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let group_id = query
        .group_id
        .ok_or_else(|| ApiError::field_error("group_id", "group_id is required"))?;

    let messages = state.bus.history(&caller, group_id, query.since, query.limit).await?;
    Ok(ApiResponse::success(messages))
}
