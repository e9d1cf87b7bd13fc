use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

use chrono::Duration;

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::session::session_cookie;
use crate::identity::RequestContext;

/// Resolves the caller once per request and hands it to handlers as an `Extension<Caller>`.
/// Anonymous callers pass through; handlers decide what needs authentication.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = RequestContext::from_headers(request.headers());
    let caller = state.resolver.resolve(&ctx).await?;

    // Signup on first sighting
    if let Some(identity) = caller.identity() {
        state.identities.ensure_profile(identity).await?;
    }

    let issued = caller.issued_session().cloned();
    let refreshed = caller.resolved().and_then(|r| r.refreshed_tokens.clone());
    request.extensions_mut().insert(caller);

    let mut response = next.run(request).await;
    let security = &state.config.security;

    // A reconstructed session goes back to the client so the next call takes the session path,
    // unless the handler already set that cookie itself
    if let Some(session_id) = issued {
        if !sets_cookie(&response, &security.session_cookie) {
            let cookie = session_cookie(
                &security.session_cookie,
                &session_id,
                state.sessions.ttl(),
                security.require_https,
            );
            append_cookie(&mut response, &cookie);
        }
    }

    // A refresh exchange rotated the pair; the old refresh token may be single-use
    if let Some(pair) = refreshed {
        let identity = &state.config.identity;
        if let (Some(access_name), Some(refresh_name)) =
            (identity.access_cookie_names.first(), identity.refresh_cookie_names.first())
        {
            let access = session_cookie(
                access_name,
                &pair.access_token,
                Duration::seconds(pair.expires_in),
                security.require_https,
            );
            let refresh = session_cookie(
                refresh_name,
                &pair.refresh_token,
                Duration::hours(security.refresh_token_hours),
                security.require_https,
            );
            append_cookie(&mut response, &access);
            append_cookie(&mut response, &refresh);
        }
    }

    Ok(response)
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&prefix))
}

fn append_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}
