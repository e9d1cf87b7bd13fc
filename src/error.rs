// HTTP API error types and the core error taxonomy they are mapped from
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::auth::TokenError;
use crate::identity::{IdentityError, ProviderError};
use crate::store::StoreError;

/// Errors raised by the gate, the workflow, the registry and the bus.
/// The HTTP layer maps them to responses; nothing in the core retries on them.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No resolvable identity
    #[error("authentication required")]
    Authentication,

    /// Known identity, insufficient role or membership
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    /// State-machine precondition violated
    #[error("{0}")]
    Conflict(ConflictKind),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    PendingRequestExists,
    AlreadyProcessed,
    AlreadyAdmin,
}

impl ConflictKind {
    pub fn code(&self) -> &'static str {
        match self {
            ConflictKind::PendingRequestExists => "PENDING_REQUEST_EXISTS",
            ConflictKind::AlreadyProcessed => "ALREADY_PROCESSED",
            ConflictKind::AlreadyAdmin => "ALREADY_ADMIN",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ConflictKind::PendingRequestExists => "pending request exists",
            ConflictKind::AlreadyProcessed => "already processed",
            ConflictKind::AlreadyAdmin => "already an admin",
        };
        f.write_str(msg)
    }
}

impl CoreError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        CoreError::Forbidden(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PendingExists => CoreError::Conflict(ConflictKind::PendingRequestExists),
            StoreError::AlreadyProcessed => CoreError::Conflict(ConflictKind::AlreadyProcessed),
            StoreError::NotFound(what) => CoreError::NotFound(what),
            StoreError::NotMember => CoreError::forbidden("Not a member of this group"),
            other => CoreError::Storage(other),
        }
    }
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    InvalidJson(String),
    /// Workflow precondition failures carry their own machine-readable code
    StateConflict {
        message: String,
        code: &'static str,
    },

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 502 Bad Gateway (identity provider issues)
    BadGateway(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::StateConflict { .. } => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::InternalServerError(_) => 500,
            ApiError::BadGateway(_) => 502,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidJson(msg) => msg,
            ApiError::StateConflict { message, .. } => message,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::BadGateway(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::ValidationError { message, field_errors } => {
                let mut response = json!({
                    "error": true,
                    "message": message,
                    "code": "VALIDATION_ERROR"
                });

                if let Some(field_errors) = field_errors {
                    response["field_errors"] = json!(field_errors);
                }

                response
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::StateConflict { code, .. } => code,
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(message: impl Into<String>, field_errors: Option<HashMap<String, String>>) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    /// Validation failure pinned to a single request field
    pub fn field_error(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut field_errors = HashMap::new();
        field_errors.insert(field.to_string(), message.clone());
        ApiError::validation_error(message, Some(field_errors))
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError::BadGateway(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            // Never say whether the account exists
            CoreError::Authentication => ApiError::unauthorized("Authentication required"),
            CoreError::Forbidden(msg) => ApiError::forbidden(msg),
            CoreError::Validation(msg) => ApiError::validation_error(msg, None),
            CoreError::Conflict(kind) => ApiError::StateConflict {
                message: kind.to_string(),
                code: kind.code(),
            },
            CoreError::NotFound(what) => ApiError::not_found(format!("{} not found", capitalize(what))),
            CoreError::Storage(e) => {
                // Log the real error but return generic message
                tracing::error!("Storage error: {}", e);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        CoreError::from(err).into()
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::MalformedSession(detail) => {
                tracing::warn!("Rejected malformed session credential: {}", detail);
                ApiError::bad_request("Malformed session credential")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidSecret | TokenError::Generation(_) => {
                tracing::error!("Token service error: {}", err);
                ApiError::internal_server_error("Unable to issue credentials")
            }
            TokenError::Invalid(_) | TokenError::WrongKind => ApiError::unauthorized("Invalid or expired token"),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        tracing::warn!("Identity provider error: {}", err);
        ApiError::bad_gateway("Identity provider unavailable")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// Standard error trait implementations
impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_map_to_bad_request_with_specific_codes() {
        let err: ApiError = CoreError::Conflict(ConflictKind::AlreadyProcessed).into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "ALREADY_PROCESSED");
        assert_eq!(err.message(), "already processed");

        let err: ApiError = CoreError::Conflict(ConflictKind::PendingRequestExists).into();
        assert_eq!(err.error_code(), "PENDING_REQUEST_EXISTS");
    }

    #[test]
    fn store_errors_translate_to_core_errors() {
        assert!(matches!(CoreError::from(StoreError::NotMember), CoreError::Forbidden(_)));
        assert!(matches!(CoreError::from(StoreError::NotFound("group")), CoreError::NotFound("group")));
        let err: ApiError = StoreError::NotFound("request").into();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.message(), "Request not found");
    }

    #[test]
    fn authentication_failures_are_generic() {
        let err: ApiError = CoreError::Authentication.into();
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.to_json()["code"], "UNAUTHORIZED");
    }
}
