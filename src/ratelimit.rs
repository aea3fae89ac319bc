use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::AppError;

/// Bucket key used when no forwarded address is present. All such callers
/// share one window; crude, but it never fails open.
pub const UNKNOWN_IDENTITY: &str = "unknown";

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// key: metering-ratelimit -> fixed window counter per client identity
///
/// The counter store is injected rather than kept in a module-level static so
/// it can be replaced by a distributed store when the service is scaled out.
/// Cloning shares the underlying map.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    buckets: Arc<DashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowStatus {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            *crate::config::RATE_LIMIT_MAX_REQUESTS,
            Duration::seconds(*crate::config::RATE_LIMIT_WINDOW_SECS),
        )
    }

    /// Counts one request against `identity` and reports the window state.
    /// The first request in an elapsed window resets the counter to 1.
    pub fn hit(&self, identity: &str, now: DateTime<Utc>) -> WindowStatus {
        self.purge_expired(now);
        let mut entry = self
            .buckets
            .entry(identity.to_string())
            .or_insert(Window {
                started_at: now,
                count: 0,
            });
        if now - entry.started_at >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }
        entry.count += 1;
        let window = *entry;
        drop(entry);
        self.status_for(window)
    }

    /// Read-only check; does not count a request.
    pub fn is_limited(&self, identity: &str, now: DateTime<Utc>) -> bool {
        self.peek(identity, now).map_or(false, |s| s.limited)
    }

    /// Quota left in the current window without counting a request.
    pub fn remaining(&self, identity: &str, now: DateTime<Utc>) -> u32 {
        self.peek(identity, now)
            .map_or(self.max_requests, |s| s.remaining)
    }

    /// Instant at which the identity's current window ends.
    pub fn reset_time(&self, identity: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        self.peek(identity, now)
            .map_or(now + self.window, |s| s.reset_at)
    }

    fn peek(&self, identity: &str, now: DateTime<Utc>) -> Option<WindowStatus> {
        let entry = self.buckets.get(identity)?;
        if now - entry.started_at >= self.window {
            return None;
        }
        Some(self.status_for(*entry))
    }

    fn status_for(&self, window: Window) -> WindowStatus {
        WindowStatus {
            limited: window.count > self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(window.count),
            reset_at: window.started_at + self.window,
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        let window = self.window;
        self.buckets
            .retain(|_, state| now - state.started_at < window);
    }
}

/// Client identity for rate limiting: first hop of `X-Forwarded-For`, then
/// `X-Real-IP`, else the shared unknown bucket. Not persisted anywhere.
pub fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
        .unwrap_or(UNKNOWN_IDENTITY)
        .to_string()
}

/// Axum middleware gating the metering endpoint. Rejected requests never
/// reach the handler; allowed ones get `X-RateLimit-*` headers stamped on
/// the response.
pub async fn enforce<B>(
    Extension(limiter): Extension<FixedWindowLimiter>,
    req: Request<B>,
    next: Next<B>,
) -> Response {
    let now = Utc::now();
    let identity = client_identity(req.headers());
    let status = limiter.hit(&identity, now);
    if status.limited {
        let retry_after = (status.reset_at - now).num_seconds().max(1);
        tracing::warn!(%identity, retry_after, "request rate limited");
        return AppError::RateLimited {
            retry_after,
            reset_at: status.reset_at.timestamp(),
        }
        .into_response();
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(status.limit as u64),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(status.remaining as u64),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(status.reset_at.timestamp().max(0) as u64),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn requests_under_cap_are_allowed() {
        let limiter = FixedWindowLimiter::new(3, Duration::seconds(60));
        let t0 = at(0);
        for expected_remaining in [2, 1, 0] {
            let status = limiter.hit("1.2.3.4", t0);
            assert!(!status.limited);
            assert_eq!(status.remaining, expected_remaining);
            assert_eq!(status.reset_at, t0 + Duration::seconds(60));
        }
    }

    #[test]
    fn request_over_cap_is_rejected_until_window_resets() {
        let limiter = FixedWindowLimiter::new(3, Duration::seconds(60));
        let t0 = at(0);
        for _ in 0..3 {
            assert!(!limiter.hit("1.2.3.4", t0).limited);
        }
        assert!(limiter.hit("1.2.3.4", t0).limited);
        assert!(limiter.is_limited("1.2.3.4", t0));
        assert_eq!(limiter.remaining("1.2.3.4", t0), 0);

        // a fresh window starts with count = 1
        let later = at(61);
        let status = limiter.hit("1.2.3.4", later);
        assert!(!status.limited);
        assert_eq!(status.remaining, 2);
        assert_eq!(status.reset_at, later + Duration::seconds(60));
    }

    #[test]
    fn identities_are_independent() {
        let limiter = FixedWindowLimiter::new(1, Duration::seconds(60));
        let t0 = at(0);
        assert!(!limiter.hit("1.2.3.4", t0).limited);
        assert!(limiter.hit("1.2.3.4", t0).limited);
        assert!(!limiter.hit("5.6.7.8", t0).limited);
    }

    #[test]
    fn expired_buckets_are_purged_on_hit() {
        let limiter = FixedWindowLimiter::new(5, Duration::seconds(60));
        limiter.hit("1.2.3.4", at(0));
        limiter.hit("5.6.7.8", at(0));
        assert_eq!(limiter.buckets.len(), 2);
        limiter.hit("9.9.9.9", at(120));
        assert_eq!(limiter.buckets.len(), 1);
    }

    #[test]
    fn unknown_identity_without_state_is_not_limited() {
        let limiter = FixedWindowLimiter::new(3, Duration::seconds(60));
        assert!(!limiter.is_limited(UNKNOWN_IDENTITY, at(0)));
        assert_eq!(limiter.remaining(UNKNOWN_IDENTITY, at(0)), 3);
    }

    #[test]
    fn forwarded_header_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        assert_eq!(client_identity(&headers), "1.2.3.4");
    }

    #[test]
    fn real_ip_header_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_identity(&headers), "9.9.9.9");
    }

    #[test]
    fn missing_address_uses_shared_unknown_bucket() {
        let headers = HeaderMap::new();
        assert_eq!(client_identity(&headers), UNKNOWN_IDENTITY);
    }
}
