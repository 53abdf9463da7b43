#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use quizgen_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{NewQuiz, Question, QuestionDraft, Quiz},
    services::{
        ai_backend::{AttemptError, CompletionBackend},
        quiz_store::{InMemoryQuizStore, QuizStore, StoreError},
        AppState,
    },
};

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Backend that replays a fixed script of results and records every call.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, AttemptError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String, AttemptError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, model: &str, _prompt: &str) -> Result<String, AttemptError> {
        self.calls.lock().unwrap().push(model.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AttemptError::Other("script exhausted".into())))
    }
}

/// In-memory store whose question inserts can be switched to fail.
#[derive(Default)]
pub struct TestStore {
    pub inner: InMemoryQuizStore,
    pub fail_question_insert: AtomicBool,
}

#[async_trait]
impl QuizStore for TestStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_quiz(&self, quiz: NewQuiz) -> Result<Quiz, StoreError> {
        self.inner.insert_quiz(quiz).await
    }

    async fn insert_questions(
        &self,
        quiz_id: &str,
        drafts: Vec<QuestionDraft>,
    ) -> Result<Vec<Question>, StoreError> {
        if self.fail_question_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("questions collection offline".into()));
        }
        self.inner.insert_questions(quiz_id, drafts).await
    }

    async fn delete_quiz(&self, quiz_id: &str) -> Result<(), StoreError> {
        self.inner.delete_quiz(quiz_id).await
    }

    async fn find_quiz(&self, quiz_id: &str) -> Result<Option<Quiz>, StoreError> {
        self.inner.find_quiz(quiz_id).await
    }

    async fn list_quizzes(&self, owner_id: &str, limit: i64) -> Result<Vec<Quiz>, StoreError> {
        self.inner.list_quizzes(owner_id, limit).await
    }

    async fn find_questions(&self, quiz_id: &str) -> Result<Vec<Question>, StoreError> {
        self.inner.find_questions(quiz_id).await
    }

    async fn count_questions(&self, quiz_id: &str) -> Result<u64, StoreError> {
        self.inner.count_questions(quiz_id).await
    }

    async fn list_orphaned_quizzes(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Quiz>, StoreError> {
        self.inner.list_orphaned_quizzes(cutoff, limit).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<TestStore>,
    pub backend: Arc<ScriptedBackend>,
}

/// Default config with millisecond backoffs so tests run fast.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.jwt_secret = TEST_JWT_SECRET.to_string();
    config.ai.models = vec!["model-a".to_string(), "model-b".to_string()];
    config.generation.rate_limit_backoff = Duration::from_millis(5);
    config.generation.rate_limit_jitter = Duration::from_millis(5);
    config.generation.round_backoff = Duration::from_millis(5);
    config.generation.request_deadline = Duration::from_secs(10);
    config
}

pub fn create_test_app(script: Vec<Result<String, AttemptError>>) -> TestApp {
    create_test_app_with_config(test_config(), script)
}

pub fn create_test_app_with_config(
    config: Config,
    script: Vec<Result<String, AttemptError>>,
) -> TestApp {
    init_tracing();

    let store = Arc::new(TestStore::default());
    let backend = ScriptedBackend::new(script);
    let state = AppState::from_parts(config, store.clone(), backend.clone(), None);

    TestApp {
        router: create_router(Arc::new(state)),
        store,
        backend,
    }
}

pub fn bearer(owner_id: &str) -> String {
    let token = JwtService::new(TEST_JWT_SECRET)
        .generate_token(&JwtClaims::for_subject(owner_id, 3600))
        .unwrap();
    format!("Bearer {token}")
}

/// A well-formed model response with `count` questions.
pub fn quiz_json(count: usize, title: Option<&str>) -> String {
    let questions: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            serde_json::json!({
                "question": format!("Which planet is number {}?", i + 1),
                "options": {"A": "Mercury", "B": "Venus", "C": "Earth", "D": "Mars"},
                "correctAnswer": "C",
                "explanation": "Counting outward from the Sun."
            })
        })
        .collect();
    let body = match title {
        Some(title) => serde_json::json!({"quiz": {"title": title, "id": "x"}, "questions": questions}),
        None => serde_json::json!({"questions": questions}),
    };
    format!("```json\n{body}\n```")
}

pub fn generate_request(owner_id: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/quizzes")
        .header("content-type", "application/json")
        .header("authorization", bearer(owner_id))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(owner_id: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", bearer(owner_id))
        .body(Body::empty())
        .unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, body)
}
