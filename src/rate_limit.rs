//! Fixed-window rate limiter keyed by client address.
//!
//! Each key owns a `(count, window_start)` pair. A window that has fully
//! elapsed is reset on the next check for that key only. The check and the
//! increment happen while the key's map shard is locked, so concurrent
//! requests from one client cannot overshoot the limit.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{ApiError, retry_after_secs};

/// Paths that bypass rate limiting.
const EXEMPT_PATHS: &[&str] = &["/", "/health"];

/// How often stale windows are swept from the map.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when rejected).
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

/// Process-wide request counter, shared by every request handler.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.config.max_requests
    }

    pub fn trusts_forwarded(&self) -> bool {
        self.config.trust_forwarded
    }

    /// Count one request from `key` against the current window.
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let window = self.config.window;
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { count: 0, started: now });
        let state = entry.value_mut();

        if now.saturating_duration_since(state.started) >= window {
            state.count = 0;
            state.started = now;
        }
        let reset_after = window.saturating_sub(now.saturating_duration_since(state.started));

        if state.count >= self.config.max_requests {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_after,
            };
        }

        state.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.config.max_requests - state.count,
            reset_after,
        }
    }

    /// Drop keys whose window has elapsed.
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let window = self.config.window;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked client keys.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

/// Spawn a background task that periodically prunes stale windows.
pub fn spawn_prune_task(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let pruned = limiter.prune(Instant::now());
            if pruned > 0 {
                debug!(pruned, "Pruned rate limit windows");
            }
        }
    })
}

/// Identify the client by peer address. The first `X-Forwarded-For` hop is
/// used instead only when `trust_forwarded` is set.
fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .filter(|_| trust_forwarded)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware: admit or reject before any handler runs.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer, limiter.trusts_forwarded());
    let decision = limiter.check(&key);

    if !decision.allowed {
        warn!(
            client = %key,
            retry_after_secs = retry_after_secs(decision.reset_after),
            "Rate limit exceeded"
        );
        return ApiError::RateLimited {
            retry_after: decision.reset_after,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.max_requests()));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
}
