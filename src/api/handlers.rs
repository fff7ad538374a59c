use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::models::{HealthResponse, RespondRequest, RespondResponse};
use crate::app_state::AppState;
use crate::llm::loader::device_name;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.model_id().to_string(),
        device: device_name(state.device()).to_string(),
    })
}

/// `POST /api/respond`: `{ "message": ... }` in, `{ "response": ... }` out.
pub async fn respond(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RespondRequest>, JsonRejection>,
) -> Result<Json<RespondResponse>, ApiError> {
    let Json(payload) = payload?;
    tracing::debug!(message = %payload.message, "respond request");

    let response = state.respond(payload.message).await?;

    tracing::info!(chars = response.chars().count(), "generated response");
    Ok(Json(RespondResponse { response }))
}
