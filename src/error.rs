//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Architect call timed out after {0}ms")]
    ArchitectTimeout(u64),

    #[error("Plan schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Blocked by cost governance: {0}")]
    GovernanceBlocked(String),

    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Gateway dispatch failed: {0}")]
    GatewayDispatch(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Stale transition for job {job_id}: expected {expected}, found {actual}")]
    StaleTransition {
        job_id: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("External agent error: {0}")]
    ExternalAgent(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
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
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::ArchitectTimeout(ms) => (
                StatusCode::GATEWAY_TIMEOUT,
                "ARCHITECT_TIMEOUT",
                format!("Plan generation timed out after {}ms", ms),
                None,
            ),
            AppError::SchemaValidation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "REJECTED_SCHEMA",
                msg.clone(),
                None,
            ),
            AppError::GovernanceBlocked(msg) => (
                StatusCode::PAYMENT_REQUIRED,
                "BLOCKED_BY_GOVERNANCE",
                msg.clone(),
                None,
            ),
            AppError::PayloadTooLarge { size, limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                format!("Prompt is {} bytes, limit is {} bytes", size, limit),
                None,
            ),
            AppError::GatewayDispatch(msg) => {
                error!("Gateway dispatch error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "GATEWAY_DISPATCH_ERROR",
                    "Execution gateway unavailable".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::RateLimited(msg) => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                msg.clone(),
                None,
            ),
            AppError::StaleTransition { .. } => (
                StatusCode::CONFLICT,
                "STALE_TRANSITION",
                self.to_string(),
                None,
            ),
            AppError::InvalidTransition(msg) => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                msg.clone(),
                None,
            ),
            AppError::ExternalAgent(msg) => {
                error!("External agent error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_AGENT_ERROR",
                    "An external agent call failed".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;
