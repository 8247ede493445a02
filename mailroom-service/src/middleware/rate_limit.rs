//! Per-route rate limiting
//!
//! Sliding-window counters per (client IP, bucket), held in memory behind a
//! single mutex. Counters are intentionally per-process; a restart empties
//! the window. Rate limiting is the primary load-shedding knob in front of
//! the write queue's Busy threshold.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::client_ip;
use crate::config::RateLimitConfig;
use crate::error::Error;
use crate::state::AppState;

const WINDOW: Duration = Duration::from_secs(60);
const RETRY_AFTER_SECS: u64 = 60;

const EXEMPT_EXACT: &[&str] = &["/health", "/docs", "/redoc", "/openapi.json"];
const EXEMPT_PREFIXES: &[&str] = &["/static/", "/uploads/"];

/// Which limit applies to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Login,
    Api,
}

/// Sliding-window rate limiter
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, Bucket), VecDeque<Instant>>>,
    login_limit: u32,
    api_limit: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            login_limit: config.login_per_minute,
            api_limit: config.api_per_minute,
        }
    }

    /// Record one request; `true` when within the limit
    pub fn allow(&self, ip: &str, bucket: Bucket) -> bool {
        self.allow_at(ip, bucket, Instant::now())
    }

    fn allow_at(&self, ip: &str, bucket: Bucket, now: Instant) -> bool {
        let limit = match bucket {
            Bucket::Login => self.login_limit,
            Bucket::Api => self.api_limit,
        };

        let mut windows = self.windows.lock().expect("rate limit mutex poisoned");
        let entries = windows
            .entry((ip.to_string(), bucket))
            .or_default();

        while let Some(front) = entries.front() {
            if now.duration_since(*front) >= WINDOW {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() as u32 >= limit {
            return false;
        }
        entries.push_back(now);
        true
    }
}

/// The middleware itself
pub async fn rate_limit_guard(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Error> {
    let path = request.uri().path();
    if exempt(path) {
        return Ok(next.run(request).await);
    }

    let bucket = if path == "/auth/login" {
        Bucket::Login
    } else {
        Bucket::Api
    };
    let ip = client_ip(&request).unwrap_or_else(|| "unknown".to_string());

    if !state.rate_limiter.allow(&ip, bucket) {
        tracing::warn!(ip = %ip, path = %path, "Rate limit exceeded");
        return Err(Error::RateLimited {
            retry_after_secs: RETRY_AFTER_SECS,
        });
    }

    Ok(next.run(request).await)
}

fn exempt(path: &str) -> bool {
    EXEMPT_EXACT.contains(&path)
        || EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(login: u32, api: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            login_per_minute: login,
            api_per_minute: api,
        })
    }

    #[test]
    fn test_limit_boundary() {
        let limiter = limiter(10, 100);
        let now = Instant::now();
        // Exactly the limit succeeds; the next request is refused
        for _ in 0..10 {
            assert!(limiter.allow_at("10.0.0.1", Bucket::Login, now));
        }
        assert!(!limiter.allow_at("10.0.0.1", Bucket::Login, now));
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(2, 100);
        let start = Instant::now();
        assert!(limiter.allow_at("ip", Bucket::Login, start));
        assert!(limiter.allow_at("ip", Bucket::Login, start + Duration::from_secs(30)));
        assert!(!limiter.allow_at("ip", Bucket::Login, start + Duration::from_secs(45)));
        // First entry ages out after a full window
        assert!(limiter.allow_at("ip", Bucket::Login, start + Duration::from_secs(61)));
    }

    #[test]
    fn test_buckets_and_ips_are_independent() {
        let limiter = limiter(1, 1);
        let now = Instant::now();
        assert!(limiter.allow_at("a", Bucket::Login, now));
        assert!(limiter.allow_at("a", Bucket::Api, now));
        assert!(limiter.allow_at("b", Bucket::Login, now));
        assert!(!limiter.allow_at("a", Bucket::Login, now));
    }

    #[test]
    fn test_exemptions() {
        assert!(exempt("/health"));
        assert!(exempt("/docs"));
        assert!(exempt("/static/app.css"));
        assert!(exempt("/uploads/packages/2026/08/x.jpg"));
        assert!(!exempt("/auth/login"));
        assert!(!exempt("/packages"));
    }
}
