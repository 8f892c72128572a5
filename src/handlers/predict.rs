//! Batch prediction handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::{AppError, AppResult, AppState};
use crate::engine::DispatchError;
use crate::models::{PredictRequest, PredictResponse, PredictionSlot};

/// Classify a batch of samples.
///
/// Validation is all-or-nothing; backend failures are reported per slot.
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> AppResult<Json<PredictResponse>> {
    let Json(req) = payload?;

    let samples = state.normalizer.normalize(&req.samples)?;
    let outcomes = state.dispatcher.dispatch_batch(&samples).await;

    let mut predictions = Vec::with_capacity(samples.len());
    let mut failed = 0;
    for (sample, outcome) in samples.iter().zip(outcomes) {
        match outcome {
            Ok(result) => predictions.push(PredictionSlot::Scored(result)),
            Err(DispatchError::Inference(message)) => {
                failed += 1;
                predictions.push(PredictionSlot::failed(&sample.id, message));
            }
            Err(other) => return Err(AppError::from(other)),
        }
    }

    tracing::info!(samples = samples.len(), failed, "Scored batch");

    Ok(Json(PredictResponse {
        predictions,
        model: state.dispatcher.model_id().to_string(),
    }))
}
