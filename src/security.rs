//! API-key guard and per-operator throttle for the manual scan triggers.

use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const API_KEY_HEADER: &str = "X-Scout-Key";

#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, AuthContext>>,
    limiter: Arc<TokenBuckets>,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub operator: String,
    pub api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let keys = parse_keys(&env::var("SCOUT_API_KEYS").unwrap_or_default());
        if keys.is_empty() {
            warn!(
                target = "scout.api",
                "SCOUT_API_KEYS is empty; manual scan endpoints will reject every request"
            );
        } else {
            info!(target = "scout.api", key_count = keys.len(), "loaded API keys from env");
        }
        Self {
            keys: Arc::new(keys),
            limiter: Arc::new(TokenBuckets::from_env()),
        }
    }

    pub fn new(raw_keys: &str, rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            keys: Arc::new(parse_keys(raw_keys)),
            limiter: Arc::new(TokenBuckets::new(rate_per_sec, capacity)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.keys.get(presented).cloned()
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Scout-Key or a Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.operator).await {
        Ok(()) => {
            info!(
                target = "scout.api",
                operator = %context.operator,
                key = %context.api_key_id,
                "manual_trigger_authorized"
            );
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(retry_after) => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many scan triggers",
            );
            response.headers_mut().insert(
                http::header::RETRY_AFTER,
                HeaderValue::from_str(&retry_after.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("1")),
            );
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// `operator:key` pairs separated by commas.
fn parse_keys(raw: &str) -> HashMap<String, AuthContext> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once(':') {
            Some((operator, key)) if !operator.trim().is_empty() && !key.trim().is_empty() => {
                entries.insert(
                    key.trim().to_string(),
                    AuthContext {
                        operator: operator.trim().to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(target = "scout.api", "ignored malformed SCOUT_API_KEYS entry #{}", idx + 1),
        }
    }
    entries
}

struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, BucketState>>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBuckets {
    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec: rate_per_sec.max(f64::EPSILON),
            capacity: capacity.max(1.0),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn from_env() -> Self {
        let rate_per_sec = env::var("TRIGGER_RATE_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(0.2);
        let capacity = env::var("TRIGGER_RATE_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(3.0);
        Self::new(rate_per_sec, capacity)
    }

    /// `Err` carries the whole seconds until the next token.
    async fn consume(&self, key: &str) -> Result<(), u64> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err((deficit / self.rate_per_sec).ceil().max(1.0) as u64)
        }
    }
}
