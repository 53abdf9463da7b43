use std::sync::Arc;

use crate::config::{Config, StorageBackend};
use crate::models::ModelCandidate;
use ai_backend::{build_backend, CompletionBackend};
use quiz_service::QuizGenerationService;
use quiz_store::{InMemoryQuizStore, MongoQuizStore, QuizStore};
use redis::aio::ConnectionManager;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn QuizStore>,
    pub quizzes: QuizGenerationService,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = connect_store(&config).await?;

        let redis = match config.redis_uri.as_deref() {
            Some(uri) => Some(connect_redis(uri).await?),
            None => {
                tracing::info!("REDIS_URI not set; generation throttle disabled");
                None
            }
        };

        let backend = build_backend(&config.ai)?;
        tracing::info!(
            provider = config.ai.provider.as_str(),
            models = config.ai.models.len(),
            "AI backend configured"
        );

        Ok(Self::from_parts(config, store, backend, redis))
    }

    /// Assembles state from already-built dependencies.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn QuizStore>,
        backend: Arc<dyn CompletionBackend>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        let candidates = ModelCandidate::from_identifiers(config.ai.models.iter().cloned());
        let quizzes = QuizGenerationService::new(
            backend,
            candidates,
            store.clone(),
            config.generation.clone(),
        );
        Self {
            config,
            store,
            quizzes,
            redis,
        }
    }
}

pub async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn QuizStore>> {
    match config.storage.backend {
        StorageBackend::Mongo => {
            let client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
            let store = MongoQuizStore::new(client.database(&config.mongo_database));
            if let Err(e) = store.ensure_indexes().await {
                tracing::warn!(error = %e, "Failed to ensure quiz indexes");
            }
            tracing::info!("MongoDB quiz store ready");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory quiz store; data is lost on restart");
            Ok(Arc::new(InMemoryQuizStore::new()))
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(uri)?;

    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");

    Ok(redis)
}

pub mod ai_backend;
pub mod generation_controller;
pub mod offline_quiz;
pub mod orphan_sweeper;
pub mod prompt_builder;
pub mod quiz_parser;
pub mod quiz_persistence;
pub mod quiz_service;
pub mod quiz_store;
