use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use validator::Validate;

use crate::config::GenerationConfig;
use crate::metrics::{GENERATION_FAILURES_TOTAL, QUIZZES_GENERATED_TOTAL};
use crate::models::{GenerationRequest, ModelCandidate, NewQuiz, Quiz, QuizWithQuestions};
use crate::services::ai_backend::CompletionBackend;
use crate::services::generation_controller::{
    BackoffPolicy, GenerationController, GenerationOutcome,
};
use crate::services::offline_quiz;
use crate::services::prompt_builder::build_prompt;
use crate::services::quiz_persistence::{PersistError, QuizPersistence};
use crate::services::quiz_store::{QuizStore, StoreError};

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum QuizGenerationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("quiz not found")]
    NotFound,
    #[error("all model candidates are rate limited")]
    RateLimited,
    #[error("no model candidate produced a quiz")]
    UpstreamUnavailable,
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QuizGenerationError {
    fn metric_reason(&self) -> &'static str {
        match self {
            QuizGenerationError::InvalidRequest(_) => "invalid_request",
            QuizGenerationError::NotFound => "not_found",
            QuizGenerationError::RateLimited => "rate_limited",
            QuizGenerationError::UpstreamUnavailable => "upstream_unavailable",
            QuizGenerationError::Persist(_) | QuizGenerationError::Store(_) => "storage",
        }
    }
}

/// End-to-end pipeline: prompt, remote attempts, offline fallback, storage.
pub struct QuizGenerationService {
    controller: GenerationController,
    persistence: QuizPersistence,
    store: Arc<dyn QuizStore>,
    config: GenerationConfig,
}

impl QuizGenerationService {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        candidates: Vec<ModelCandidate>,
        store: Arc<dyn QuizStore>,
        config: GenerationConfig,
    ) -> Self {
        let controller =
            GenerationController::new(backend, candidates, BackoffPolicy::from_config(&config));
        Self {
            controller,
            persistence: QuizPersistence::new(store.clone()),
            store,
            config,
        }
    }

    pub fn candidates(&self) -> &[ModelCandidate] {
        self.controller.candidates()
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub async fn generate(
        &self,
        owner_id: &str,
        request: GenerationRequest,
    ) -> Result<QuizWithQuestions, QuizGenerationError> {
        let result = self.run_pipeline(owner_id, request).await;
        if let Err(err) = &result {
            GENERATION_FAILURES_TOTAL
                .with_label_values(&[err.metric_reason()])
                .inc();
        }
        result
    }

    async fn run_pipeline(
        &self,
        owner_id: &str,
        request: GenerationRequest,
    ) -> Result<QuizWithQuestions, QuizGenerationError> {
        let request = request.normalized();
        self.validate(&request)?;

        tracing::info!(
            owner_id,
            topic = %request.topic,
            difficulty = %request.difficulty,
            question_count = request.question_count,
            "Generating quiz"
        );

        let prompt = build_prompt(&request);
        let deadline = if self.config.request_deadline.is_zero() {
            None
        } else {
            Some(Instant::now() + self.config.request_deadline)
        };

        let report = self.controller.run(&request, &prompt, deadline).await;

        let (payload, source) = match report.outcome {
            GenerationOutcome::Succeeded { payload, model } => {
                tracing::info!(model = %model, attempts = report.attempts.len(), "Remote generation succeeded");
                (payload, "remote")
            }
            GenerationOutcome::Exhausted(reason) if self.config.offline_fallback => {
                tracing::warn!(
                    ?reason,
                    attempts = report.attempts.len(),
                    "Using offline quiz generator"
                );
                (offline_quiz::generate(&request), "offline")
            }
            GenerationOutcome::Exhausted(reason) => {
                tracing::warn!(?reason, "Remote generation exhausted and offline fallback disabled");
                return Err(if report.saw_rate_limit() {
                    QuizGenerationError::RateLimited
                } else {
                    QuizGenerationError::UpstreamUnavailable
                });
            }
        };

        let title = payload
            .title
            .unwrap_or_else(|| format!("{} Quiz", request.topic));
        let new_quiz = NewQuiz {
            owner_id: owner_id.to_string(),
            title,
            topic: request.topic.clone(),
            difficulty: request.difficulty,
        };

        let saved = self.persistence.persist(new_quiz, payload.questions).await?;
        QUIZZES_GENERATED_TOTAL.with_label_values(&[source]).inc();
        tracing::info!(quiz_id = %saved.quiz.id, source, "Quiz stored");
        Ok(saved)
    }

    fn validate(&self, request: &GenerationRequest) -> Result<(), QuizGenerationError> {
        request
            .validate()
            .map_err(|e| QuizGenerationError::InvalidRequest(e.to_string()))?;
        if request.question_count > self.config.max_questions {
            return Err(QuizGenerationError::InvalidRequest(format!(
                "questionCount must not exceed {}",
                self.config.max_questions
            )));
        }
        Ok(())
    }

    /// Only quizzes owned by the caller are visible; others read as missing.
    /// A quiz whose questions are not stored (yet, or any more) is missing too.
    pub async fn get_quiz(
        &self,
        owner_id: &str,
        quiz_id: &str,
    ) -> Result<QuizWithQuestions, QuizGenerationError> {
        let quiz = self
            .store
            .find_quiz(quiz_id)
            .await?
            .filter(|quiz| quiz.owner_id == owner_id)
            .ok_or(QuizGenerationError::NotFound)?;
        let questions = self.store.find_questions(&quiz.id).await?;
        if questions.is_empty() {
            return Err(QuizGenerationError::NotFound);
        }
        Ok(QuizWithQuestions { quiz, questions })
    }

    pub async fn list_quizzes(
        &self,
        owner_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Quiz>, QuizGenerationError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        Ok(self.store.list_quizzes(owner_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;
    use crate::services::ai_backend::AttemptError;
    use crate::services::quiz_store::InMemoryQuizStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Answers every call with the same result.
    struct FixedBackend(Result<String, AttemptError>);

    #[async_trait]
    impl CompletionBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn complete(&self, _model: &str, _prompt: &str) -> Result<String, AttemptError> {
            self.0.clone()
        }
    }

    fn fast_config() -> GenerationConfig {
        GenerationConfig {
            rate_limit_backoff: Duration::from_millis(1),
            rate_limit_jitter: Duration::ZERO,
            round_backoff: Duration::from_millis(1),
            ..GenerationConfig::default()
        }
    }

    fn service(
        result: Result<String, AttemptError>,
        config: GenerationConfig,
    ) -> (Arc<InMemoryQuizStore>, QuizGenerationService) {
        let store = Arc::new(InMemoryQuizStore::new());
        let svc = QuizGenerationService::new(
            Arc::new(FixedBackend(result)),
            ModelCandidate::from_identifiers(["m1", "m2"]),
            store.clone(),
            config,
        );
        (store, svc)
    }

    fn remote_quiz(count: usize, title: Option<&str>) -> String {
        let questions: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "question": format!("Q{i}?"),
                    "options": {"A": "one", "B": "two", "C": "three", "D": "four"},
                    "correctAnswer": "C",
                    "explanation": "why"
                })
            })
            .collect();
        match title {
            Some(title) => serde_json::json!({"quiz": {"title": title}, "questions": questions}),
            None => serde_json::json!({"questions": questions}),
        }
        .to_string()
    }

    #[tokio::test]
    async fn remote_quiz_without_title_gets_topic_title() {
        let (store, svc) = service(Ok(remote_quiz(3, None)), fast_config());
        let saved = svc
            .generate("u1", GenerationRequest::new(" Glaciers ", Difficulty::Easy, 3))
            .await
            .unwrap();

        assert_eq!(saved.quiz.title, "Glaciers Quiz");
        assert_eq!(saved.quiz.topic, "Glaciers");
        assert_eq!(saved.questions.len(), 3);
        assert_eq!(store.quiz_count().await, 1);
    }

    #[tokio::test]
    async fn exhaustion_falls_back_to_offline_quiz() {
        let (_, svc) = service(Err(AttemptError::NotFound("gone".into())), fast_config());
        let saved = svc
            .generate("u1", GenerationRequest::new("Glaciers", Difficulty::Hard, 4))
            .await
            .unwrap();

        assert_eq!(saved.quiz.title, "Glaciers (Offline Mode)");
        assert_eq!(saved.questions.len(), 4);
    }

    #[tokio::test]
    async fn exhaustion_without_fallback_is_classified() {
        let config = GenerationConfig {
            offline_fallback: false,
            ..fast_config()
        };
        let (store, svc) = service(Err(AttemptError::RateLimited("429".into())), config.clone());
        let err = svc
            .generate("u1", GenerationRequest::new("Glaciers", Difficulty::Hard, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, QuizGenerationError::RateLimited));
        assert_eq!(store.quiz_count().await, 0);

        let (_, svc) = service(Err(AttemptError::Other("500".into())), config);
        let err = svc
            .generate("u1", GenerationRequest::new("Glaciers", Difficulty::Hard, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, QuizGenerationError::UpstreamUnavailable));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_generation() {
        let (store, svc) = service(Ok(remote_quiz(1, None)), fast_config());
        for request in [
            GenerationRequest::new("  ", Difficulty::Easy, 1),
            GenerationRequest::new("Rust", Difficulty::Easy, 0),
            GenerationRequest::new("Rust", Difficulty::Easy, 21),
        ] {
            let err = svc.generate("u1", request).await.unwrap_err();
            assert!(matches!(err, QuizGenerationError::InvalidRequest(_)));
        }
        assert_eq!(store.quiz_count().await, 0);
    }

    #[tokio::test]
    async fn quizzes_are_scoped_to_their_owner() {
        let (_, svc) = service(Ok(remote_quiz(2, Some("Ice"))), fast_config());
        let saved = svc
            .generate("owner-a", GenerationRequest::new("Ice", Difficulty::Easy, 2))
            .await
            .unwrap();

        let loaded = svc.get_quiz("owner-a", &saved.quiz.id).await.unwrap();
        assert_eq!(loaded.questions, saved.questions);
        assert!(matches!(
            svc.get_quiz("owner-b", &saved.quiz.id).await,
            Err(QuizGenerationError::NotFound)
        ));
        assert_eq!(svc.list_quizzes("owner-a", None).await.unwrap().len(), 1);
        assert!(svc.list_quizzes("owner-b", Some(500)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quiz_without_questions_is_not_visible() {
        let (store, svc) = service(Ok(remote_quiz(1, None)), fast_config());
        let bare = store
            .insert_quiz(NewQuiz {
                owner_id: "u1".into(),
                title: "Half written".into(),
                topic: "Ice".into(),
                difficulty: Difficulty::Easy,
            })
            .await
            .unwrap();

        assert!(matches!(
            svc.get_quiz("u1", &bare.id).await,
            Err(QuizGenerationError::NotFound)
        ));
        assert!(svc.list_quizzes("u1", None).await.unwrap().is_empty());

        let saved = svc
            .generate("u1", GenerationRequest::new("Ice", Difficulty::Easy, 1))
            .await
            .unwrap();
        let listed = svc.list_quizzes("u1", None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, saved.quiz.id);
    }
}
