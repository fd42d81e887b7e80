//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes HTTP error response construction to keep error shapes uniform
//! across control-plane endpoints, and maps service [`Error`]s onto them.
//!
//! # Key invariants and assumptions
//! - Error responses must include a stable `code` and human-readable `message`.
//! - Status codes must align with the error category.
//!
//! # Security considerations
//! - Internal errors log details server-side but return generic messages.
//! - Request IDs are optional; avoid leaking sensitive details in messages.
use crate::api::types::ErrorResponse;
use crate::errors::{Error, ErrorKind};
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # What it does
/// Couples an HTTP status code with a JSON error body.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use controlplane::api::error::ApiError;
/// use controlplane::api::types::ErrorResponse;
///
/// let err = ApiError {
///     status: StatusCode::NOT_FOUND,
///     body: ErrorResponse {
///         code: "not_found".to_string(),
///         message: "missing".to_string(),
///         request_id: None,
///     },
/// };
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

/// Build a 404 Not Found error.
///
/// # What it does
/// Returns an `ApiError` with code `not_found` and the provided message.
///
/// # Errors
/// - Does not fail.
pub fn api_not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Build a 409 Conflict error.
///
/// # What it does
/// Returns an `ApiError` with a caller-provided conflict code, such as
/// `already_exists` or `group_not_empty`.
///
/// # Errors
/// - Does not fail.
pub fn api_conflict(code: &str, message: &str) -> ApiError {
    // Caller provides a specific conflict code for precise client handling.
    api_error(StatusCode::CONFLICT, code, message)
}

/// Build a 500 Internal Server Error from a service error.
///
/// # What it does
/// Logs the error and returns a generic internal error response.
///
/// # Errors
/// - Does not fail; `err` is only logged, never echoed to the client.
pub fn api_internal(message: &str, err: &Error) -> ApiError {
    // Log internal details server-side for debugging; return generic message.
    tracing::error!(error = ?err, "controlplane request failed");
    api_internal_message(message)
}

/// Build a 500 Internal Server Error without an underlying error.
pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 401 Unauthorized error.
///
/// # What it does
/// Used when the `x-arbiter-subject` header is missing or a thing key is
/// unknown.
pub fn api_unauthorized(message: &str) -> ApiError {
    // Authentication failed or missing.
    api_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// Build a 403 Forbidden error.
pub fn api_forbidden(message: &str) -> ApiError {
    // Authorization failed despite authentication.
    api_error(StatusCode::FORBIDDEN, "forbidden", message)
}

/// Build a 400 Bad Request validation error.
///
/// # Errors
/// - Does not fail.
pub fn api_validation_error(message: &str) -> ApiError {
    // Client input failed validation or was malformed.
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Translate a service error into its HTTP shape.
///
/// # What it does
/// Maps each [`ErrorKind`] to one status code. Messages of client-side
/// failures are passed through; internal failures are logged and replaced by
/// a generic message.
///
/// # Errors
/// - Does not fail; every kind has a mapping.
pub fn api_from_error(err: Error) -> ApiError {
    match err.kind() {
        ErrorKind::MalformedEntity => api_validation_error(&err.to_string()),
        ErrorKind::NotFound => api_not_found(&err.to_string()),
        ErrorKind::Conflict => api_conflict("already_exists", &err.to_string()),
        ErrorKind::GroupNotEmpty => api_conflict("group_not_empty", &err.to_string()),
        ErrorKind::Authentication => api_unauthorized(&err.to_string()),
        ErrorKind::Authorization => api_forbidden(&err.to_string()),
        ErrorKind::Internal => api_internal("internal error", &err),
    }
}
