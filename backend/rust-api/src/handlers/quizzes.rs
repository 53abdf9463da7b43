use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::Instrument;

use crate::extractors::AppJson;
use crate::handlers::error::ApiError;
use crate::middlewares::{auth::JwtClaims, trace::RequestTraceContext};
use crate::models::{GenerationRequest, Quiz, QuizListQuery, QuizWithQuestions};
use crate::services::AppState;

/// POST /api/v1/quizzes - generate and store a quiz for the caller
pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    trace: Option<Extension<RequestTraceContext>>,
    AppJson(request): AppJson<GenerationRequest>,
) -> Result<(StatusCode, Json<QuizWithQuestions>), ApiError> {
    let trace_id = trace
        .map(|Extension(ctx)| ctx.trace_id)
        .unwrap_or_default();
    let span = tracing::info_span!("generate_quiz", trace_id = %trace_id, owner_id = %claims.sub);

    let saved = state
        .quizzes
        .generate(&claims.sub, request)
        .instrument(span)
        .await?;

    Ok((StatusCode::CREATED, Json(saved)))
}

/// GET /api/v1/quizzes - the caller's quizzes, newest first
pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<QuizListQuery>,
) -> Result<Json<Vec<Quiz>>, ApiError> {
    let quizzes = state.quizzes.list_quizzes(&claims.sub, query.limit).await?;
    Ok(Json(quizzes))
}

/// GET /api/v1/quizzes/{id}
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
) -> Result<Json<QuizWithQuestions>, ApiError> {
    let quiz = state.quizzes.get_quiz(&claims.sub, &quiz_id).await?;
    Ok(Json(quiz))
}
