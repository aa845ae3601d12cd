//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its
//! mapping onto structured JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;
use challenge_picker_core::EngineError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from the rule engine.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    /// Every error becomes `{code, message, ...}` with a stable code string.
    /// Throttling errors carry the remaining wait so clients can auto-retry;
    /// internal failures are logged in full and returned as a generic message.
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Engine(e) => {
                let code = e.code();
                match e {
                    EngineError::Unauthorized => (
                        StatusCode::UNAUTHORIZED,
                        json!({ "code": code, "message": e.to_string() }),
                    ),
                    EngineError::Forbidden => (
                        StatusCode::FORBIDDEN,
                        json!({ "code": code, "message": e.to_string() }),
                    ),
                    EngineError::NotFound(_) => (
                        StatusCode::NOT_FOUND,
                        json!({ "code": code, "message": e.to_string() }),
                    ),
                    EngineError::InvalidTransition { .. } | EngineError::Conflict(_) => (
                        StatusCode::CONFLICT,
                        json!({ "code": code, "message": e.to_string() }),
                    ),
                    EngineError::RateLimited { seconds_remaining } => (
                        StatusCode::TOO_MANY_REQUESTS,
                        json!({
                            "code": code,
                            "message": e.to_string(),
                            "retry_after_seconds": seconds_remaining,
                        }),
                    ),
                    EngineError::RuleOnCooldown {
                        rule_id,
                        seconds_remaining,
                    } => (
                        StatusCode::TOO_MANY_REQUESTS,
                        json!({
                            "code": code,
                            "message": e.to_string(),
                            "rule_id": rule_id,
                            "cooldown_seconds_remaining": seconds_remaining,
                        }),
                    ),
                    EngineError::Validation(_) => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        json!({ "code": code, "message": e.to_string() }),
                    ),
                    EngineError::Internal(_) => {
                        error!("Internal engine error: {e:?}");
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            json!({ "code": code, "message": "An internal error occurred" }),
                        )
                    }
                }
            }
            other => {
                error!("Request failed: {other:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "code": "internal_error", "message": "An internal error occurred" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
