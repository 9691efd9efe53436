use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use metrics::counter;
use tracing::warn;

use crate::problem::{ProblemKind, ProblemResponse};
use crate::Clock;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Per-caller fixed window counter held in memory.
#[derive(Clone)]
pub struct FixedWindowRateLimiter {
    windows: Arc<DashMap<String, Window>>,
    limit: u32,
    window: ChronoDuration,
    clock: Clock,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_clock(limit, window, Arc::new(Utc::now))
    }

    pub fn with_clock(limit: u32, window: Duration, clock: Clock) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            limit,
            window: ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::minutes(1)),
            clock,
        }
    }

    /// Counts one request for `key` and reports whether it may proceed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = (self.clock)();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now - entry.started_at >= self.window {
            *entry = Window {
                started_at: now,
                count: 0,
            };
        }

        if entry.count < self.limit {
            entry.count += 1;
            return RateLimitDecision::Allowed {
                remaining: self.limit - entry.count,
            };
        }

        let retry_after = (entry.started_at + self.window - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        RateLimitDecision::Limited { retry_after }
    }

    /// Drops windows that have already closed.
    pub fn purge_expired(&self) -> usize {
        let now = (self.clock)();
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now - window.started_at < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn window(&self) -> Duration {
        self.window.to_std().unwrap_or(DEFAULT_WINDOW)
    }
}

/// Middleware rejecting callers over their budget with `429` and `Retry-After`.
pub async fn enforce(
    State(limiter): State<FixedWindowRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    match limiter.check(&key) {
        RateLimitDecision::Allowed { .. } => next.run(request).await,
        RateLimitDecision::Limited { retry_after } => {
            counter!("domain_search_requests_total", "result" => "rate_limited").increment(1);
            let problem = ProblemResponse::new(ProblemKind::RateLimited, "too many requests")
                .retry_after(retry_after);
            warn!(
                stage = "search",
                client = %key,
                retry_after = problem.retry_after_secs(),
                "rate limit exceeded"
            );
            problem.into_response()
        }
    }
}

/// First `X-Forwarded-For` hop, then the peer address.
fn client_key(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
