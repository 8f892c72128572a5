//! Error handling

use std::time::Duration;
use axum::{
    extract::rejection::JsonRejection,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::engine::{DispatchError, ValidationError};
use crate::upstream::UpstreamError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    // Input errors
    #[error("{0}")]
    Validation(ValidationError),

    #[error("request body too large: {0}")]
    PayloadTooLarge(String),

    // Scoring errors
    #[error("{0}")]
    Inference(String),

    #[error("scoring capacity exhausted, retry later (waited {0:?})")]
    Overloaded(Duration),

    #[error("server is shutting down")]
    ShuttingDown,

    // Proxy errors
    #[error("UPSTREAM_BASE or UPSTREAM_TOKEN not set on server.")]
    UpstreamNotConfigured,

    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl AppError {
    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Inference(_) => "inference_error",
            AppError::Overloaded(_) => "overloaded",
            AppError::ShuttingDown => "shutting_down",
            AppError::UpstreamNotConfigured
            | AppError::UpstreamTimeout(_)
            | AppError::Upstream(_) => "upstream_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Overloaded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ShuttingDown | AppError::UpstreamNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::Inference(msg) => tracing::error!("Inference error: {}", msg),
            AppError::Upstream(msg) => tracing::error!("Upstream error: {}", msg),
            AppError::Validation(e) => tracing::debug!("Rejected batch: {}", e),
            _ => tracing::warn!("{}", self),
        }

        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16(),
        });
        if let AppError::Validation(e) = &self {
            body["detail"] = json!({ "index": e.index, "field": e.field });
        }

        let mut response = (status, Json(body)).into_response();
        if let AppError::Overloaded(_) = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Inference(msg) => AppError::Inference(msg),
            DispatchError::Overloaded(waited) => AppError::Overloaded(waited),
            DispatchError::ShuttingDown => AppError::ShuttingDown,
        }
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout(after) => AppError::UpstreamTimeout(after),
            UpstreamError::Request(msg) => AppError::Upstream(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge(rejection.body_text());
        }
        AppError::Validation(ValidationError::batch("body", rejection.body_text()))
    }
}
