//! Per-caller rate limiting for the OAuth endpoints.
//!
//! Fixed windows keyed by `(path prefix, caller)` in a DashMap. The caller is
//! the peer IP from `ConnectInfo`, or the first `X-Forwarded-For` hop when the
//! bridge runs behind a trusted proxy.

use axum::{
    extract::{ConnectInfo, Request},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Bucket key for requests whose caller cannot be determined
const UNKNOWN_CALLER: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Limit for one path prefix
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

/// Shared rate limiter state (clone-friendly via Arc)
#[derive(Clone)]
pub struct RateLimiter {
    /// (path prefix, caller) → (window_start, request_count)
    buckets: Arc<DashMap<(String, String), (Instant, u32)>>,
    rules: Arc<Vec<(String, RateLimitConfig)>>,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(rules: Vec<(String, RateLimitConfig)>) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            rules: Arc::new(rules),
            trust_forwarded_for: false,
        }
    }

    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Caller identity for bucketing
    fn caller(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_forwarded_for {
            let forwarded = headers
                .get(FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|hop| !hop.is_empty());
            if let Some(hop) = forwarded {
                return hop.to_string();
            }
        }
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CALLER.to_string())
    }

    /// `Err(retry_after)` when `caller` is over the limit for `path`
    fn check(&self, path: &str, caller: &str) -> Result<(), Duration> {
        let Some((prefix, config)) = self.rules.iter().find(|(prefix, _)| path.starts_with(prefix.as_str())) else {
            return Ok(());
        };

        let mut entry = self
            .buckets
            .entry((prefix.clone(), caller.to_string()))
            .or_insert_with(|| (Instant::now(), 0));
        let (window_start, count) = entry.value_mut();

        let elapsed = window_start.elapsed();
        if elapsed >= config.window {
            *window_start = Instant::now();
            *count = 1;
            return Ok(());
        }
        if *count >= config.max_requests {
            return Err(config.window - elapsed);
        }
        *count += 1;
        Ok(())
    }

    /// Drop buckets whose window has passed
    pub fn purge(&self) -> usize {
        let longest = self
            .rules
            .iter()
            .map(|(_, config)| config.window)
            .max()
            .unwrap_or_default();
        let before = self.buckets.len();
        self.buckets.retain(|_, (window_start, _)| window_start.elapsed() < longest);
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Rejects over-limit requests with 429. The limiter comes from an
/// `Extension` layer; without one every request passes.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    if let Some(limiter) = request.extensions().get::<RateLimiter>() {
        let path = request.uri().path();
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let caller = limiter.caller(request.headers(), peer);

        if let Err(retry_after) = limiter.check(path, &caller) {
            warn!("[Gateway] Rate limit exceeded on {} for {}", path, caller);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "rate_limited",
                    "error_description": "Rate limit exceeded. Please try again later."
                })),
            )
                .into_response();
            let seconds = retry_after.as_secs().max(1).to_string();
            if let Ok(value) = HeaderValue::from_str(&seconds) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }
    }

    next.run(request).await
}

/// Default limits for the OAuth endpoints
pub fn default_oauth_rate_limiter() -> RateLimiter {
    RateLimiter::new(vec![
        ("/authorize".to_string(), RateLimitConfig::per_minute(30)),
        ("/callback".to_string(), RateLimitConfig::per_minute(60)),
        ("/access-token".to_string(), RateLimitConfig::per_minute(60)),
        ("/register".to_string(), RateLimitConfig::per_minute(20)),
        ("/revoke".to_string(), RateLimitConfig::per_minute(30)),
    ])
}
