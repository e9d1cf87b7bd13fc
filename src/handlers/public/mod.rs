// handlers/public/mod.rs - endpoints that never look at the caller
//
// Route Prefix: none (/, /health, /auth/*)

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};

pub mod auth;

/// GET / - service description
pub async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "Campus API",
            "version": version,
            "description": "Admin elevation workflow and membership-gated group chat",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "public_auth": "/auth/token, /auth/refresh (public - token acquisition)",
                "auth": "/api/auth/whoami, /api/auth/session",
                "requests": "/api/requests (submit, list, review)",
                "groups": "/api/groups[/:id], /api/groups/join, /api/groups/leave, /api/groups/:id/members",
                "messages": "/api/messages (send, history)",
                "subscribe": "/api/groups/:id/subscribe (websocket)",
            }
        }
    }))
}

/// GET /health - store connectivity
pub async fn health(State(state): State<AppState>) -> ApiResult<Value> {
    if let Err(e) = state.store.ping().await {
        tracing::error!("Health check failed: {}", e);
        return Err(ApiError::service_unavailable(format!("{} store unavailable", state.store.engine())));
    }

    Ok(ApiResponse::success(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "store": state.store.engine()
    })))
}
