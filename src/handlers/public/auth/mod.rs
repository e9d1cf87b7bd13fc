// handlers/public/auth/mod.rs - token acquisition
//
// Both endpoints answer with a token pair and set the session cookie, so browsers take the
// session path on their next call.

use axum::http::{header, HeaderMap, HeaderValue};
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::TokenPair;
use crate::database::models::Role;
use crate::identity::session::session_cookie;
use crate::identity::Identity;

pub mod refresh; // POST /auth/refresh - exchange a refresh token
pub mod token; // POST /auth/token - development sign-in

pub use refresh::refresh_post;
pub use token::token_post;

#[derive(Debug, Serialize)]
pub struct SignedInUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: SignedInUser,
}

/// Persists a session for the identity and returns the cookie header carrying it
pub(crate) fn start_session(state: &AppState, identity: &Identity) -> HeaderMap {
    let session = state.sessions.issue(identity.clone());
    let security = &state.config.security;
    let cookie = session_cookie(
        &security.session_cookie,
        &session.id,
        state.sessions.ttl(),
        security.require_https,
    );

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.insert(header::SET_COOKIE, value);
    }
    headers
}

pub(crate) fn sign_in_response(pair: TokenPair, role: Role) -> SignInResponse {
    SignInResponse {
        user: SignedInUser {
            id: pair.identity.user_id,
            email: pair.identity.email.clone(),
            role,
        },
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_in: pair.expires_in,
    }
}
