use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::models::ModelCandidate;
use crate::services::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListResponse {
    pub provider: String,
    pub rounds: u32,
    pub candidates: Vec<ModelCandidate>,
}

/// GET /api/v1/models - configured candidates in the order they are tried
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        provider: state.config.ai.provider.as_str().to_string(),
        rounds: state.config.generation.rounds,
        candidates: state.quizzes.candidates().to_vec(),
    })
}
