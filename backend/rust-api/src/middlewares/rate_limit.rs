use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::handlers::error::ApiError;
use crate::metrics::{track_cache_operation, GENERATION_THROTTLED_TOTAL};
use crate::services::AppState;

const GENERATION_WINDOW_SECONDS: u64 = 60;

// Fixed window: first hit sets the counter with a TTL, later hits increment
// until the limit is reached.
const RATE_LIMIT_SCRIPT: &str = r#"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])

    local current = redis.call('GET', key)

    if current == false then
        redis.call('SET', key, 1, 'EX', window)
        return 1
    end

    current = tonumber(current)

    if current >= limit then
        return 0
    end

    redis.call('INCR', key)
    return 1
"#;

fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    // Preferred order: X-Forwarded-For, Forwarded, X-Real-IP, ConnectInfo
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            // x-forwarded-for can be a comma separated list; take first
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            for part in s.split(';') {
                let p = part.trim();
                if p.starts_with("for=") {
                    let val = p.trim_start_matches("for=").trim().trim_matches('\"');
                    return val.to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

/// Throttle key: the authenticated owner when known, the client IP otherwise.
fn throttle_key(request: &Request) -> String {
    match request.extensions().get::<super::auth::JwtClaims>() {
        Some(claims) => format!("ratelimit:generate:user:{}", claims.sub),
        None => format!(
            "ratelimit:generate:ip:{}",
            extract_client_ip_from(request.headers(), request.extensions())
        ),
    }
}

/// Per-owner cap on quiz generations. Skipped when Redis is not configured.
pub async fn generation_throttle_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(next.run(request).await);
    };

    if std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1" {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(next.run(request).await);
    }

    let limit = state.config.generation.rate_limit_per_minute;
    if limit == 0 {
        return Ok(next.run(request).await);
    }

    let key = throttle_key(&request);
    match check_rate_limit(redis, &key, limit, GENERATION_WINDOW_SECONDS).await {
        Ok(true) => {}
        Ok(false) => {
            GENERATION_THROTTLED_TOTAL.inc();
            tracing::warn!(key = %key, "Generation rate limit exceeded");
            return Err(ApiError::RateLimited(format!(
                "At most {limit} quiz generations per minute"
            )));
        }
        Err(e) => {
            // Redis outage must not block generation
            tracing::error!("Rate limit check failed: {}", e);
        }
    }

    Ok(next.run(request).await)
}

/// Check rate limit using Redis with Lua script for atomicity
async fn check_rate_limit(
    redis: &ConnectionManager,
    key: &str,
    limit: u32,
    window_seconds: u64,
) -> redis::RedisResult<bool> {
    let mut conn = redis.clone();

    let allowed: u32 = track_cache_operation("rate_limit", async {
        redis::Script::new(RATE_LIMIT_SCRIPT)
            .key(key)
            .arg(limit)
            .arg(window_seconds)
            .invoke_async(&mut conn)
            .await
    })
    .await?;

    Ok(allowed == 1)
}
