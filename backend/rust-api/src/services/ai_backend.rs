use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::{AiConfig, AiProvider};
use crate::metrics::GENERATION_ATTEMPT_DURATION_SECONDS;
use crate::models::{AttemptOutcome, ModelCandidate};

/// Transport-level failure of a single completion call, already classified
/// for the retry policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),
    #[error("model not available: {0}")]
    NotFound(String),
    #[error("upstream failure: {0}")]
    Other(String),
}

impl AttemptError {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            AttemptError::RateLimited(_) => AttemptOutcome::RateLimited,
            AttemptError::NotFound(_) => AttemptOutcome::NotFound,
            AttemptError::Other(_) => AttemptOutcome::OtherError,
        }
    }
}

/// A text-completion service addressed by model identifier.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// One call, one outcome. Implementations must not retry.
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, AttemptError>;
}

pub fn build_backend(config: &AiConfig) -> anyhow::Result<Arc<dyn CompletionBackend>> {
    let client = Client::builder()
        .timeout(config.request_timeout)
        .build()?;

    if config.api_key.is_none() {
        tracing::warn!("No AI API key configured; every quiz will use the offline generator");
    }

    let backend: Arc<dyn CompletionBackend> = match config.provider {
        AiProvider::Gemini => Arc::new(GeminiBackend::new(
            client,
            config.base_url.clone(),
            config.api_key.clone(),
            config.temperature,
        )),
        AiProvider::OpenAiCompatible => Arc::new(OpenAiCompatibleBackend::new(
            client,
            config.base_url.clone(),
            config.api_key.clone(),
            config.temperature,
        )),
    };
    Ok(backend)
}

/// Executes one generation call against one candidate.
pub async fn attempt(
    backend: &dyn CompletionBackend,
    candidate: &ModelCandidate,
    prompt: &str,
) -> Result<String, AttemptError> {
    let start = Instant::now();
    let result = backend.complete(&candidate.identifier, prompt).await;

    GENERATION_ATTEMPT_DURATION_SECONDS
        .with_label_values(&[candidate.identifier.as_str()])
        .observe(start.elapsed().as_secs_f64());

    if let Err(err) = &result {
        tracing::debug!(
            backend = backend.name(),
            model = %candidate.identifier,
            error = %err,
            "Completion call failed"
        );
    }

    result
}

/// Maps a non-success upstream status onto the retry taxonomy.
pub fn classify_status(status: StatusCode, model: &str, body: &str) -> AttemptError {
    let detail = format!("{} {}: {}", model, status.as_u16(), truncate(body, 300));
    match status {
        StatusCode::TOO_MANY_REQUESTS => AttemptError::RateLimited(detail),
        StatusCode::NOT_FOUND => AttemptError::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            tracing::error!(model, status = status.as_u16(), "Upstream rejected AI credentials");
            AttemptError::Other(detail)
        }
        _ => AttemptError::Other(detail),
    }
}

/// The request URL is stripped so credentials never reach error text or logs.
fn classify_transport(err: reqwest::Error, model: &str) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Other(format!("{model}: request timed out"))
    } else {
        AttemptError::Other(format!("{model}: {}", err.without_url()))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

async fn read_success_body(
    response: reqwest::Response,
    model: &str,
) -> Result<String, AttemptError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(classify_status(status, model, &body));
    }
    response.text().await.map_err(|e| classify_transport(e, model))
}

pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiBackend {
    pub fn new(client: Client, base_url: String, api_key: Option<String>, temperature: f32) -> Self {
        Self {
            client,
            base_url,
            api_key,
            temperature,
        }
    }

    /// Concatenated text parts of the first candidate.
    pub fn extract_text(body: &str) -> Option<String> {
        let parsed: GeminiResponse = serde_json::from_str(body).ok()?;
        let content = parsed.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String, AttemptError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AttemptError::Other("AI API key not configured".to_string()))?;

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(e, model))?;

        let raw = read_success_body(response, model).await?;
        Self::extract_text(&raw)
            .ok_or_else(|| AttemptError::Other(format!("{model}: response contained no text")))
    }
}

pub struct OpenAiCompatibleBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiCompatibleBackend {
    pub fn new(client: Client, base_url: String, api_key: Option<String>, temperature: f32) -> Self {
        Self {
            client,
            base_url,
            api_key,
            temperature,
        }
    }

    pub fn extract_text(body: &str) -> Option<String> {
        let parsed: ChatCompletionResponse = serde_json::from_str(body).ok()?;
        parsed
            .choices
            .into_iter()
            .next()?
            .message?
            .content
            .filter(|text| !text.trim().is_empty())
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &'static str {
        "openai_compatible"
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String, AttemptError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AttemptError::Other("AI API key not configured".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": prompt },
                { "role": "user", "content": "Generate the quiz now." }
            ],
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(e, model))?;

        let raw = read_success_body(response, model).await?;
        Self::extract_text(&raw)
            .ok_or_else(|| AttemptError::Other(format!("{model}: response contained no text")))
    }
}
