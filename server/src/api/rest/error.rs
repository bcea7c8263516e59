//! Error handling for REST API
//!
//! Provides the `AppError` type used across all REST endpoints and the
//! principal extraction helper.

use crate::api::AppState;
use crate::auth::{self, Principal};
use crate::error::FsError;
use axum::{
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => {
                // SECURITY: Log full details server-side, return generic message to client
                tracing::error!(details = %msg, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal error occurred".to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

impl From<FsError> for AppError {
    fn from(err: FsError) -> Self {
        match err {
            err if err.is_structural() => AppError::BadRequest(err.to_string()),
            FsError::NotFound(path) => AppError::NotFound(format!("{} not found", path)),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // SECURITY: Log the full error server-side but return generic message to client
        tracing::error!("Internal error: {:#}", err);
        AppError::Internal("An internal error occurred".to_string())
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Resolve the caller from an optional `Authorization: Bearer` identity token.
///
/// No header means an anonymous caller; a header that does not verify is
/// rejected rather than downgraded.
pub fn extract_principal(state: &AppState, headers: &HeaderMap) -> Result<Principal, AppError> {
    let Some(auth_header) = headers.get(header::AUTHORIZATION) else {
        return Ok(Principal::Anonymous);
    };

    let token = auth_header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization format".into()))?;

    let user = auth::verify_identity_token(&state.config.jwt_secret, token.trim()).map_err(|e| {
        tracing::debug!(error = %e, "identity token rejected");
        AppError::Unauthorized("Invalid or expired token".into())
    })?;
    Ok(Principal::User(user))
}
