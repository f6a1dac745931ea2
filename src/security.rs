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

#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, String>>,
    limiter: Arc<RateLimiter>,
}

/// The org resolved from the presented API key; attached as a request
/// extension for handlers to log against.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub org_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        Self {
            keys: Arc::new(load_keys_from_env()),
            limiter: Arc::new(RateLimiter::from_env()),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.keys.get(presented).map(|org_id| AuthContext {
            org_id: org_id.clone(),
        })
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
            "Provide X-Crosslist-Key or a Bearer token",
        ));
    };
    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.org_id).await {
        Ok(remaining) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            set_header(response.headers_mut(), "X-RateLimit-Remaining", remaining);
            Ok(response)
        }
        Err(retry_after) => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            );
            set_header(response.headers_mut(), "Retry-After", retry_after);
            set_header(response.headers_mut(), "X-RateLimit-Remaining", 0);
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
        .get("X-Crosslist-Key")
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

fn set_header(headers: &mut http::HeaderMap, name: &'static str, value: u64) {
    headers.insert(
        name,
        HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
}

/// `CROSSLIST_API_KEYS` holds comma-separated `org:key` pairs; the map is
/// keyed by the secret.
fn load_keys_from_env() -> HashMap<String, String> {
    let raw = env::var("CROSSLIST_API_KEYS").unwrap_or_else(|_| "demo-org:demo-key".to_string());
    let mut entries = HashMap::new();
    for token in raw.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let org = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (org, key) {
            (Some(org), Some(secret)) => {
                entries.insert(secret.to_string(), org.to_string());
            }
            _ => warn!(
                target = "crosslist.api",
                "ignored malformed CROSSLIST_API_KEYS entry: {trimmed}"
            ),
        }
    }
    if entries.is_empty() {
        warn!(
            target = "crosslist.api",
            "CROSSLIST_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert("demo-key".to_string(), "demo-org".to_string());
    } else {
        info!(
            target = "crosslist.api",
            key_count = entries.len(),
            "loaded API keys from env"
        );
    }
    entries
}

/// Per-org token bucket. The marketplace APIs set the real rate limits; this
/// only keeps one org from monopolizing the worker.
struct RateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    refilled: Instant,
}

impl RateLimiter {
    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Ok(remaining tokens) or Err(seconds until a token frees up).
    async fn consume(&self, org_id: &str) -> Result<u64, u64> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = guard.entry(org_id.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            refilled: now,
        });

        let elapsed = now.duration_since(bucket.refilled).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            bucket.refilled = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(bucket.tokens.floor() as u64)
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err((deficit / self.rate_per_sec).ceil().max(1.0) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_drains_and_rejects() {
        let limiter = RateLimiter {
            rate_per_sec: 1.0,
            capacity: 2.0,
            buckets: Mutex::new(HashMap::new()),
        };
        assert!(limiter.consume("org-a").await.is_ok());
        assert!(limiter.consume("org-a").await.is_ok());
        let retry = limiter.consume("org-a").await.expect_err("exhausted");
        assert!(retry >= 1);
        // a different org has its own bucket
        assert!(limiter.consume("org-b").await.is_ok());
    }
}
