//! Per-client throttling for `POST /embed`.
//!
//! Each configured window (minute, hour, day) is a governor keyed limiter
//! over the client IP. A request must pass every window.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tasklens_core::config::RateLimitConfig;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

struct Window {
    label: String,
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

/// A rejected request: which window tripped and when to come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    pub window: String,
    pub retry_after: Duration,
}

impl RateLimited {
    /// Whole seconds for the `Retry-After` header, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
        secs.max(1)
    }
}

pub struct EmbedRateLimiter {
    windows: Vec<Window>,
    clock: DefaultClock,
}

impl std::fmt::Debug for EmbedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.windows.iter().map(|w| w.label.as_str()).collect();
        f.debug_struct("EmbedRateLimiter")
            .field("windows", &labels)
            .finish()
    }
}

/// `count` requests per `period`, replenished evenly, with a burst of `count`.
fn window_quota(period: Duration, count: NonZeroU32) -> Option<Quota> {
    Quota::with_period(period / count.get()).map(|q| q.allow_burst(count))
}

impl EmbedRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let mut windows = Vec::new();
        for (count, period, unit) in [
            (config.per_minute, MINUTE, "minute"),
            (config.per_hour, HOUR, "hour"),
            (config.per_day, DAY, "day"),
        ] {
            let Some(count) = NonZeroU32::new(count) else {
                continue;
            };
            if let Some(quota) = window_quota(period, count) {
                windows.push(Window {
                    label: format!("{count} per 1 {unit}"),
                    limiter: RateLimiter::keyed(quota),
                });
            }
        }

        Self {
            windows,
            clock: DefaultClock::default(),
        }
    }

    /// Record one request from `client`.
    pub fn check(&self, client: IpAddr) -> Result<(), RateLimited> {
        for window in &self.windows {
            if let Err(not_until) = window.limiter.check_key(&client) {
                return Err(RateLimited {
                    window: window.label.clone(),
                    retry_after: not_until.wait_time_from(self.clock.now()),
                });
            }
        }
        Ok(())
    }

    /// Drop state for clients whose buckets are full again.
    pub fn retain_recent(&self) {
        for window in &self.windows {
            window.limiter.retain_recent();
        }
    }

    /// Number of clients tracked by the tightest window.
    pub fn tracked_clients(&self) -> usize {
        self.windows.first().map(|w| w.limiter.len()).unwrap_or(0)
    }
}

/// Axum middleware enforcing the limiter on the client's socket address.
pub async fn enforce(
    State(limiter): State<Arc<EmbedRateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check(addr.ip()) {
        Ok(()) => next.run(request).await,
        Err(limited) => {
            tracing::warn!(
                client = %addr.ip(),
                window = %limited.window,
                retry_after_secs = limited.retry_after_secs(),
                "Rate limit exceeded"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, limited.retry_after_secs().to_string())],
                Json(serde_json::json!({
                    "error": "Too Many Requests",
                    "details": format!("Rate limit exceeded: {}", limited.window),
                })),
            )
                .into_response()
        }
    }
}

/// Periodically forget idle clients so the keyed stores do not grow forever.
pub async fn run_housekeeping(limiter: Arc<EmbedRateLimiter>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        limiter.retain_recent();
        tracing::debug!(clients = limiter.tracked_clients(), "Rate limiter housekeeping");
    }
}
