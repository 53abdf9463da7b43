use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::middlewares::auth::AuthError;
use crate::services::quiz_service::QuizGenerationError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    RateLimited(String),
    UpstreamUnavailable(String),
    Storage(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::UpstreamUnavailable(_) => "upstream_unavailable",
            ApiError::Storage(_) => "storage_error",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl From<QuizGenerationError> for ApiError {
    fn from(err: QuizGenerationError) -> Self {
        match err {
            QuizGenerationError::InvalidRequest(message) => ApiError::BadRequest(message),
            QuizGenerationError::NotFound => ApiError::not_found("Quiz not found"),
            QuizGenerationError::RateLimited => ApiError::RateLimited(
                "AI service is rate limited, please retry later".to_string(),
            ),
            QuizGenerationError::UpstreamUnavailable => ApiError::UpstreamUnavailable(
                "AI service is currently unavailable".to_string(),
            ),
            QuizGenerationError::Persist(e) => {
                tracing::error!(error = %e, "Quiz persistence failed");
                ApiError::Storage("Failed to store quiz".to_string())
            }
            QuizGenerationError::Store(e) => {
                tracing::error!(error = %e, "Quiz storage read failed");
                ApiError::Storage("Storage is unavailable".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            ApiError::BadRequest(m)
            | ApiError::Unauthorized(m)
            | ApiError::NotFound(m)
            | ApiError::RateLimited(m)
            | ApiError::UpstreamUnavailable(m)
            | ApiError::Storage(m)
            | ApiError::Internal(m) => m,
        };
        let body = serde_json::json!({
            "error": code,
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}
