use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::require_identified;
use crate::app::AppState;
use crate::database::models::{Group, GroupChanges, Membership};
use crate::error::ApiError;
use crate::identity::Caller;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateGroupBody {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MembershipBody {
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberBody {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MembershipState {
    pub group_id: Uuid,
    pub member: bool,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: Uuid,
    pub deleted: bool,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::invalid_json(e.body_text()))
}

fn group_id_of(payload: Result<Json<MembershipBody>, JsonRejection>) -> Result<Uuid, ApiError> {
    json_body(payload)?
        .group_id
        .ok_or_else(|| ApiError::field_error("group_id", "group_id is required"))
}

/// GET /api/groups - Every group, for any signed-in caller
pub async fn list(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> ApiResult<Vec<Group>> {
    Ok(ApiResponse::success(state.groups.list_groups(&caller).await?))
}

/// POST /api/groups - Create a group (admin)
pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<CreateGroupBody>, JsonRejection>,
) -> ApiResult<Group> {
    require_identified(&caller)?;
    let body = json_body(payload)?;
    let group = state
        .groups
        .create_group(&caller, body.name.as_deref().unwrap_or_default(), body.description)
        .await?;
    Ok(ApiResponse::created(group))
}

/// GET /api/groups/:id
pub async fn get_one(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<Group> {
    Ok(ApiResponse::success(state.groups.get_group(&caller, id).await?))
}

/// PUT /api/groups/:id - Rename or describe a group (admin)
pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    payload: Result<Json<GroupChanges>, JsonRejection>,
) -> ApiResult<Group> {
    require_identified(&caller)?;
    let changes = json_body(payload)?;
    Ok(ApiResponse::success(state.groups.update_group(&caller, id, changes).await?))
}

/// DELETE /api/groups/:id - Remove a group with its memberships and messages (admin).
/// Live subscriptions on the group end.
pub async fn remove(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<Deleted> {
    state.groups.delete_group(&caller, id).await?;
    Ok(ApiResponse::success(Deleted { id, deleted: true }))
}

/// POST /api/groups/join - Idempotent join
///
/// Expected Input:
/// ```json
/// { "group_id": "uuid" }
/// ```
pub async fn join(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<MembershipBody>, JsonRejection>,
) -> ApiResult<MembershipState> {
    require_identified(&caller)?;
    let group_id = group_id_of(payload)?;
    state.groups.join(&caller, group_id).await?;
    Ok(ApiResponse::success(MembershipState { group_id, member: true }))
}

/// POST /api/groups/leave - Idempotent leave
pub async fn leave(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<MembershipBody>, JsonRejection>,
) -> ApiResult<MembershipState> {
    require_identified(&caller)?;
    let group_id = group_id_of(payload)?;
    state.groups.leave(&caller, group_id).await?;
    Ok(ApiResponse::success(MembershipState { group_id, member: false }))
}

/// GET /api/groups/:id/members - Members and admins only
pub async fn members(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<Membership>> {
    Ok(ApiResponse::success(state.groups.members(&caller, id).await?))
}

/// POST /api/groups/:id/members - Add a user to a group (admin)
pub async fn add_member(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
    payload: Result<Json<AddMemberBody>, JsonRejection>,
) -> ApiResult<MembershipState> {
    require_identified(&caller)?;
    let user_id = json_body(payload)?
        .user_id
        .ok_or_else(|| ApiError::field_error("user_id", "user_id is required"))?;
    state.groups.add_member(&caller, id, user_id).await?;
    Ok(ApiResponse::success(MembershipState {
        group_id: id,
        member: true,
    }))
}

/// DELETE /api/groups/:id/members/:user_id - Remove a user from a group (admin)
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<MembershipState> {
    state.groups.remove_member(&caller, id, user_id).await?;
    Ok(ApiResponse::success(MembershipState {
        group_id: id,
        member: false,
    }))
}
