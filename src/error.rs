//! Error handling module
//!
//! Provides unified error types for the governance layer and their HTTP mapping.
//! Sequencing and concurrency errors are user-facing and carry stable codes so
//! callers can tell "re-fetch and retry" apart from "propose a new action".

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    // --- Sequencing ---
    #[error("Stage {stage_id} is not the current stage of its ladder")]
    StageNotCurrent { stage_id: Uuid },

    #[error("Approval blueprint must contain at least one stage")]
    EmptyBlueprint,

    // --- Idempotency / concurrency ---
    #[error("Override {recommendation_id} is already being reversed")]
    AlreadyLocked { recommendation_id: String },

    #[error("Baseline {baseline_id} is cooling down until {until}")]
    CoolingDown {
        baseline_id: Uuid,
        until: DateTime<Utc>,
    },

    // --- Irreversibility ---
    #[error("Override {recommendation_id} cannot be reversed")]
    NotReversible { recommendation_id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Stable machine-readable code surfaced to API callers
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Pool(_) => "POOL_EXHAUSTED",
            AppError::StageNotCurrent { .. } => "STAGE_NOT_CURRENT",
            AppError::EmptyBlueprint => "EMPTY_BLUEPRINT",
            AppError::AlreadyLocked { .. } => "ALREADY_LOCKED",
            AppError::CoolingDown { .. } => "COOLING_DOWN",
            AppError::NotReversible { .. } => "NOT_REVERSIBLE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) | AppError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StageNotCurrent { .. } | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::EmptyBlueprint | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyLocked { .. } => StatusCode::LOCKED,
            AppError::CoolingDown { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotReversible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, details) = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                ("A database error occurred".to_string(), Some(e.to_string()))
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                ("Database connection pool exhausted".to_string(), Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), Some(msg.clone()))
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                ("A configuration error occurred".to_string(), Some(msg.clone()))
            }
            other => (other.to_string(), None),
        };

        let retry_after = match &self {
            AppError::CoolingDown { until, .. } => Some(*until),
            _ => None,
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(self.code().to_string()),
            retry_after,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

/// Helper function to create a conflict error
pub fn conflict_error(msg: impl Into<String>) -> AppError {
    AppError::Conflict(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_errors_map_to_distinct_statuses() {
        let locked = AppError::AlreadyLocked { recommendation_id: "r".into() };
        let cooling = AppError::CoolingDown { baseline_id: Uuid::nil(), until: Utc::now() };
        let terminal = AppError::NotReversible { recommendation_id: "r".into() };

        assert_eq!(locked.status(), StatusCode::LOCKED);
        assert_eq!(cooling.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(terminal.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(AppError::StageNotCurrent { stage_id: Uuid::nil() }.code(), "STAGE_NOT_CURRENT");
    }
}
