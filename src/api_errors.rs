use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::errors::SimError;

/// Generic message shown to users for server-side failures.
pub const RETRY_MESSAGE: &str = "Something went wrong, please try again.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, msg) = match &self {
            AppError::BadRequest(s) => (StatusCode::BAD_REQUEST, s),
            AppError::NotFound(s) => (StatusCode::NOT_FOUND, s),
            AppError::Conflict(s) => (StatusCode::CONFLICT, s),
            AppError::BadGateway(s) => (StatusCode::BAD_GATEWAY, s),
            AppError::Internal(s) => (StatusCode::INTERNAL_SERVER_ERROR, s),
        };
        (code, Json(ErrBody { error: msg.clone() })).into_response()
    }
}

// Client errors keep their detail; server-side failures are logged and
// replaced by the generic retry message.
impl From<SimError> for AppError {
    fn from(err: SimError) -> Self {
        match err {
            SimError::Validation { field, message } => {
                AppError::BadRequest(format!("Validation error for {field}: {message}"))
            }
            SimError::NotFound { resource, id } => {
                AppError::NotFound(format!("Resource '{resource}' with ID '{id}' not found"))
            }
            SimError::Conflict { message } => AppError::Conflict(message),
            SimError::SimulationComplete { id } => {
                AppError::Conflict(format!("Simulation '{id}' is already complete"))
            }
            err @ (SimError::Backend { .. }
            | SimError::Network { .. }
            | SimError::Parse { .. }
            | SimError::TerminalFailure { .. }) => {
                tracing::error!("Upstream failure: {err}");
                AppError::BadGateway(RETRY_MESSAGE.to_string())
            }
            other => {
                tracing::error!("Internal failure: {other}");
                AppError::Internal(RETRY_MESSAGE.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_keeps_detail() {
        let err: AppError = SimError::validation("userInput", "must not be empty").into();
        assert!(matches!(err, AppError::BadRequest(ref m) if m.contains("userInput")));
    }

    #[test]
    fn server_failures_are_generic() {
        let err: AppError = SimError::invariant("archetype id 0 out of range").into();
        assert!(matches!(err, AppError::Internal(ref m) if m == RETRY_MESSAGE));

        let err: AppError = SimError::terminal("resolver rejected verdict").into();
        assert!(matches!(err, AppError::BadGateway(ref m) if m == RETRY_MESSAGE));
    }
}
