//! Upstream proxy handler

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::{AppError, AppResult, AppState};
use crate::models::PredictRequest;

/// Relay a predict request to the configured upstream service
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> AppResult<Response> {
    let client = state.upstream.as_ref().ok_or(AppError::UpstreamNotConfigured)?;
    let Json(req) = payload?;

    let reply = client.forward(&req.samples).await?;
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);

    Ok((status, Json(reply.body)).into_response())
}
