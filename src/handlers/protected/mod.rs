// handlers/protected/mod.rs - identity-resolved handlers
//
// Route Prefix: /api/*
// Middleware: identity_middleware (resolves the caller once, inserts Extension<Caller>)
//
// Handlers pass the Caller into the core components, which authorize through the gate:
// anonymous callers get 401, identified callers failing a rule get 403.

pub mod auth; // whoami, logout
pub mod groups; // group CRUD, join/leave, membership management
pub mod messages; // send, history
pub mod requests; // admin elevation requests
pub mod subscribe; // websocket fan-out

use crate::error::{ApiError, CoreError};
use crate::identity::Caller;

/// 401 for anonymous callers before any input validation runs
pub(crate) fn require_identified(caller: &Caller) -> Result<(), ApiError> {
    match caller {
        Caller::Anonymous => Err(CoreError::Authentication.into()),
        Caller::Identified(_) => Ok(()),
    }
}
