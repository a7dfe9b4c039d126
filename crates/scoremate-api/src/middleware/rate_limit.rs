//! Per-client HTTP rate limiting.
//!
//! Counters live behind [`RateLimitStore`]: [`ShardedRateLimitStore`] keeps them
//! in this process, `scoremate_db::PostgresRateLimitStore` shares them between
//! every API instance.

use crate::utils::ip_extraction::{extract_client_ip, trusted_proxy_count};
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use scoremate_db::{RateLimitDecision, RateLimitStore};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW_SECS: u64 = 60;
const DEFAULT_SHARDS: usize = 16;
const DEFAULT_MAX_BUCKETS_PER_SHARD: usize = 10_000;

#[derive(Clone)]
struct Window {
    count: u32,
    resets_at: Instant,
}

impl Window {
    fn open(now: Instant, window_secs: u64) -> Self {
        Self {
            count: 0,
            resets_at: now + Duration::from_secs(window_secs),
        }
    }

    fn hit(&mut self, now: Instant, limit: u32, window_secs: u64) -> RateLimitDecision {
        if now >= self.resets_at {
            *self = Window::open(now, window_secs);
        }
        if self.count < limit {
            self.count += 1;
            RateLimitDecision::Allowed {
                remaining: limit - self.count,
            }
        } else {
            RateLimitDecision::Limited {
                retry_after: self.resets_at.saturating_duration_since(now),
            }
        }
    }
}

/// In-process fixed-window counters, split over several mutexes so unrelated
/// clients rarely contend.
pub struct ShardedRateLimitStore {
    shards: Vec<Mutex<HashMap<String, Window>>>,
    max_buckets_per_shard: usize,
}

impl Default for ShardedRateLimitStore {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl ShardedRateLimitStore {
    pub fn with_shards(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            max_buckets_per_shard: DEFAULT_MAX_BUCKETS_PER_SHARD,
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, Window>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }
}

#[async_trait]
impl RateLimitStore for ShardedRateLimitStore {
    async fn hit(&self, key: &str, limit: u32, window_secs: u64) -> Result<RateLimitDecision> {
        let now = Instant::now();
        let mut windows = self.shard_for(key).lock().await;

        if windows.len() >= self.max_buckets_per_shard && !windows.contains_key(key) {
            windows.retain(|_, w| w.resets_at > now);
            if windows.len() >= self.max_buckets_per_shard {
                // Still full: evict the window closest to resetting.
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, w)| w.resets_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    windows.remove(&oldest);
                    tracing::debug!(evicted_key = %oldest, "Rate limit shard at capacity");
                }
            }
        }

        let window = windows
            .entry(key.to_string())
            .or_insert_with(|| Window::open(now, window_secs));
        Ok(window.hit(now, limit, window_secs))
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let mut removed = 0u64;
        for shard in &self.shards {
            let mut windows = shard.lock().await;
            let before = windows.len();
            windows.retain(|_, w| w.resets_at > now);
            removed += (before - windows.len()) as u64;
        }
        Ok(removed)
    }
}

#[derive(Clone)]
pub struct RateLimitState {
    pub store: Arc<dyn RateLimitStore>,
    pub limit_per_minute: u32,
}

fn set_header(response: &mut Response, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(name, value);
    }
}

/// Counts every request against `ip:{client}` in a one-minute window.
///
/// Adds `X-RateLimit-Limit` and `X-RateLimit-Remaining`; over the limit it
/// answers `429` with `Retry-After`. A failing counter store lets requests
/// through rather than taking the API down with it.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimitState>>,
    request: Request,
    next: Next,
) -> Response {
    let socket_addr = request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0);
    let ip = extract_client_ip(
        request.headers(),
        socket_addr.as_ref(),
        trusted_proxy_count(),
    );
    let key = format!("ip:{}", ip);
    let limit = limiter.limit_per_minute;

    match limiter.store.hit(&key, limit, WINDOW_SECS).await {
        Ok(RateLimitDecision::Allowed { remaining }) => {
            let mut response = next.run(request).await;
            set_header(&mut response, "X-RateLimit-Limit", limit);
            set_header(&mut response, "X-RateLimit-Remaining", remaining);
            response
        }
        Ok(RateLimitDecision::Limited { retry_after }) => {
            tracing::warn!(
                key = %key,
                path = %request.uri().path(),
                limit,
                "Rate limit exceeded"
            );
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({
                    "error": "Too many requests. Please slow down.",
                    "code": "RATE_LIMIT_EXCEEDED",
                    "recoverable": true,
                })),
            )
                .into_response();
            set_header(&mut response, "X-RateLimit-Limit", limit);
            set_header(&mut response, "X-RateLimit-Remaining", 0);
            set_header(&mut response, "Retry-After", retry_after.as_secs().max(1));
            response
        }
        Err(e) => {
            tracing::warn!(error = %e, key = %key, "Rate limit store unavailable, allowing request");
            next.run(request).await
        }
    }
}
