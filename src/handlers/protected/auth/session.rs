use axum::{
    extract::{Extension, Query, State},
    http::{header, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::Role;
use crate::error::{ApiError, CoreError};
use crate::gate::Predicate;
use crate::identity::session::clear_session_cookie;
use crate::identity::{Caller, Confidence, RequestContext};
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub confidence: Confidence,
}

/// GET /api/auth/whoami - Current identity, live role and how the identity was established
///
/// Expected Output:
/// ```json
/// {
///   "success": true,
///   "data": { "id": "uuid", "email": "s@campus.test", "role": "pending_admin", "confidence": "session" }
/// }
/// ```
pub async fn whoami(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> ApiResult<WhoAmI> {
    let resolved = state.gate.require(&caller, &[Predicate::Authenticated]).await?;
    let role = state.identities.get_role(resolved.user_id()).await?;

    Ok(ApiResponse::success(WhoAmI {
        id: resolved.identity.user_id,
        email: resolved.identity.email.clone(),
        role,
        confidence: resolved.confidence,
    }))
}

#[derive(Debug, Serialize)]
pub struct LoggedOut {
    pub revoked: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    /// End every session the caller holds, not just this one
    #[serde(default)]
    pub everywhere: bool,
}

/// DELETE /api/auth/session[?everywhere=true] - Revoke the caller's session and clear the cookie
///
/// The session is the one named by the session cookie, or the one persisted while resolving
/// this very request. `everywhere` revokes every session of the caller.
///
/// Expected Output:
/// ```json
/// { "success": true, "data": { "revoked": 1 } }
/// ```
pub async fn logout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<LogoutQuery>,
    headers: HeaderMap,
) -> Result<(HeaderMap, ApiResponse<LoggedOut>), ApiError> {
    let Caller::Identified(resolved) = &caller else {
        return Err(CoreError::Authentication.into());
    };

    let cookie_name = &state.config.security.session_cookie;
    let revoked = if query.everywhere {
        state.sessions.revoke_user(resolved.user_id())
    } else {
        let ctx = RequestContext::from_headers(&headers);
        [ctx.cookie(cookie_name), caller.issued_session().map(String::as_str)]
            .into_iter()
            .flatten()
            .filter(|session_id| state.sessions.revoke(session_id))
            .count()
    };
    info!(user_id = %resolved.user_id(), revoked, everywhere = query.everywhere, "session closed");

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&clear_session_cookie(cookie_name)) {
        response_headers.insert(header::SET_COOKIE, value);
    }
    Ok((response_headers, ApiResponse::success(LoggedOut { revoked })))
}
