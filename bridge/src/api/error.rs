//! API error handling — HTTP-facing mapping of the domain `Error`.
//!
//! Ported from `rust-srec/src/api/error.rs`'s shape: a status+code+message
//! envelope, with a `From<Error>` impl doing the domain-to-HTTP mapping once
//! at the boundary instead of scattering `StatusCode` choices through
//! handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, "GONE", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Maps domain errors to HTTP responses: lease exhaustion is
/// `503`, unknown entities `404`, invalid transitions and validation issues
/// `409`/`400`, everything else `500` with the detail logged but not leaked.
impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::LeaseBusy => ApiError::service_unavailable("no tuner slots available"),
            Error::ReceiverUnavailable(msg) => ApiError::service_unavailable(msg),
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{entity_type} with id '{id}' not found"))
            }
            Error::Validation(msg) => ApiError::bad_request(msg),
            Error::TuneFailed(msg) => ApiError::new(StatusCode::BAD_GATEWAY, "TUNE_FAILED", msg),
            Error::InvalidStateTransition { from, to } => {
                ApiError::conflict(format!("cannot transition from {from} to {to}"))
            }
            Error::Configuration(msg) => {
                tracing::error!(error = %msg, "configuration error");
                ApiError::internal("configuration error")
            }
            Error::Io(e) => {
                tracing::error!(error = %e, "io error");
                ApiError::internal("io error")
            }
            other => {
                tracing::error!(error = %other, "unexpected error");
                ApiError::internal("an unexpected error occurred")
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
