use config::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODELS: [&str; 6] = [
    "gemini-2.5-flash",
    "gemini-flash-latest",
    "gemini-2.0-flash-lite-001",
    "gemini-2.0-flash",
    "gemini-2.5-pro",
    "gemini-3-flash-preview",
];

const DEV_JWT_SECRET: &str = "dev-secret-only-for-local-testing";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub storage: StorageConfig,
    pub ai: AiConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
            "memory" | "in_memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Zero disables the background sweep.
    pub orphan_sweep_interval: Duration,
    pub orphan_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    Gemini,
    OpenAiCompatible,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::Gemini => "gemini",
            AiProvider::OpenAiCompatible => "openai_compatible",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            AiProvider::Gemini => "https://generativelanguage.googleapis.com",
            AiProvider::OpenAiCompatible => "https://api.openai.com/v1",
        }
    }
}

impl FromStr for AiProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(AiProvider::Gemini),
            "openai_compatible" | "openai" => Ok(AiProvider::OpenAiCompatible),
            other => Err(format!("unknown AI provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub models: Vec<String>,
    pub request_timeout: Duration,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub rounds: u32,
    pub rate_limit_backoff: Duration,
    pub rate_limit_jitter: Duration,
    pub round_backoff: Duration,
    pub request_deadline: Duration,
    pub offline_fallback: bool,
    pub max_questions: u32,
    pub rate_limit_per_minute: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            rounds: 2,
            rate_limit_backoff: Duration::from_millis(2000),
            rate_limit_jitter: Duration::from_millis(500),
            round_backoff: Duration::from_millis(3000),
            request_deadline: Duration::from_secs(60),
            offline_fallback: true,
            max_questions: 20,
            rate_limit_per_minute: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:8081".to_string(),
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "quizgen".to_string(),
            redis_uri: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            storage: StorageConfig {
                backend: StorageBackend::Mongo,
                orphan_sweep_interval: Duration::from_secs(600),
                orphan_grace: Duration::from_secs(300),
            },
            ai: AiConfig {
                provider: AiProvider::Gemini,
                api_key: None,
                base_url: AiProvider::Gemini.default_base_url().to_string(),
                models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
                request_timeout: Duration::from_secs(30),
                temperature: 0.7,
            },
            generation: GenerationConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        // Root .env first (two levels up), then the crate-local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings, &app_env)
    }

    fn from_settings(settings: &config::Config, app_env: &str) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let lookup = |key: &str, env_keys: &[&str]| -> Option<String> {
            settings
                .get_string(key)
                .ok()
                .or_else(|| env_keys.iter().find_map(|name| env::var(name).ok()))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let jwt_secret = match lookup("auth.jwt_secret", &["JWT_SECRET"]) {
            Some(secret) => secret,
            None if app_env == "prod" => {
                return Err(ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            None => {
                tracing::warn!("Using default JWT_SECRET (dev mode only!)");
                defaults.jwt_secret.clone()
            }
        };

        let provider = match lookup("ai.provider", &["AI_PROVIDER"]) {
            Some(value) => value.parse::<AiProvider>().map_err(ConfigError::Message)?,
            None => defaults.ai.provider,
        };

        let models = match lookup("ai.models", &["AI_MODELS"]) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.ai.models.clone(),
        };
        if models.is_empty() {
            return Err(ConfigError::Message(
                "ai.models must list at least one model".to_string(),
            ));
        }

        let ai = AiConfig {
            provider,
            api_key: lookup("ai.api_key", &["AI_API_KEY", "GEMINI_API_KEY"]),
            base_url: lookup("ai.base_url", &["AI_BASE_URL"])
                .unwrap_or_else(|| provider.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            models,
            request_timeout: Duration::from_secs(parse_or(
                lookup("ai.request_timeout_secs", &["AI_REQUEST_TIMEOUT_SECS"]),
                "ai.request_timeout_secs",
                defaults.ai.request_timeout.as_secs(),
            )?),
            temperature: parse_or(
                lookup("ai.temperature", &["AI_TEMPERATURE"]),
                "ai.temperature",
                defaults.ai.temperature,
            )?,
        };

        let gen_defaults = &defaults.generation;
        let generation = GenerationConfig {
            rounds: parse_or(
                lookup("generation.rounds", &["GENERATION_ROUNDS"]),
                "generation.rounds",
                gen_defaults.rounds,
            )?,
            rate_limit_backoff: Duration::from_millis(parse_or(
                lookup("generation.rate_limit_backoff_ms", &["GENERATION_RATE_LIMIT_BACKOFF_MS"]),
                "generation.rate_limit_backoff_ms",
                gen_defaults.rate_limit_backoff.as_millis() as u64,
            )?),
            rate_limit_jitter: Duration::from_millis(parse_or(
                lookup("generation.rate_limit_jitter_ms", &["GENERATION_RATE_LIMIT_JITTER_MS"]),
                "generation.rate_limit_jitter_ms",
                gen_defaults.rate_limit_jitter.as_millis() as u64,
            )?),
            round_backoff: Duration::from_millis(parse_or(
                lookup("generation.round_backoff_ms", &["GENERATION_ROUND_BACKOFF_MS"]),
                "generation.round_backoff_ms",
                gen_defaults.round_backoff.as_millis() as u64,
            )?),
            request_deadline: Duration::from_secs(parse_or(
                lookup("generation.request_deadline_secs", &["GENERATION_REQUEST_DEADLINE_SECS"]),
                "generation.request_deadline_secs",
                gen_defaults.request_deadline.as_secs(),
            )?),
            offline_fallback: parse_or(
                lookup("generation.offline_fallback", &["GENERATION_OFFLINE_FALLBACK"]),
                "generation.offline_fallback",
                gen_defaults.offline_fallback,
            )?,
            max_questions: parse_or(
                lookup("generation.max_questions", &["GENERATION_MAX_QUESTIONS"]),
                "generation.max_questions",
                gen_defaults.max_questions,
            )?,
            rate_limit_per_minute: parse_or(
                lookup("generation.rate_limit_per_minute", &["GENERATION_RATE_LIMIT_PER_MINUTE"]),
                "generation.rate_limit_per_minute",
                gen_defaults.rate_limit_per_minute,
            )?,
        };
        if generation.rounds == 0 {
            return Err(ConfigError::Message(
                "generation.rounds must be at least 1".to_string(),
            ));
        }

        let storage = StorageConfig {
            backend: match lookup("storage.backend", &["STORAGE_BACKEND"]) {
                Some(value) => value.parse().map_err(ConfigError::Message)?,
                None => defaults.storage.backend,
            },
            orphan_sweep_interval: Duration::from_secs(parse_or(
                lookup("storage.orphan_sweep_interval_secs", &["ORPHAN_SWEEP_INTERVAL_SECS"]),
                "storage.orphan_sweep_interval_secs",
                defaults.storage.orphan_sweep_interval.as_secs(),
            )?),
            orphan_grace: Duration::from_secs(parse_or(
                lookup("storage.orphan_grace_secs", &["ORPHAN_GRACE_SECS"]),
                "storage.orphan_grace_secs",
                defaults.storage.orphan_grace.as_secs(),
            )?),
        };

        Ok(Config {
            server_addr: lookup("server.addr", &["SERVER_ADDR"]).unwrap_or(defaults.server_addr),
            mongo_uri: lookup("database.mongo_uri", &["MONGO_URI"]).unwrap_or(defaults.mongo_uri),
            mongo_database: lookup("database.mongo_database", &["MONGO_DATABASE"])
                .unwrap_or(defaults.mongo_database),
            redis_uri: lookup("redis.uri", &["REDIS_URI"]),
            jwt_secret,
            storage,
            ai,
            generation,
        })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::Message(format!("invalid value for {key}: '{value}'"))),
        None => Ok(default),
    }
}
