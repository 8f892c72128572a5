//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    subscribers: usize,
    stream_ticks: u64,
    in_flight: usize,
    capacity: usize,
    timestamp: i64,
}

pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.dispatcher.is_accepting() { "healthy" } else { "draining" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        model: state.dispatcher.model_id().to_string(),
        subscribers: state.multiplexer.subscriber_count(),
        stream_ticks: state.multiplexer.ticks(),
        in_flight: state.dispatcher.in_flight(),
        capacity: state.dispatcher.capacity(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}
