//! Control-plane rate limiting.
//!
//! Sliding window over request timestamps, keyed by source address.
//! Single-process service, so the window lives in memory.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::error::AppError;
use crate::http::AppState;

/// Requests allowed per window.
pub const MAX_REQUESTS: u32 = 100;

/// Window length: 15 minutes.
pub const WINDOW_SECONDS: u64 = 15 * 60;

/// Sliding-window rate limiter over a `DashMap` of timestamp queues.
/// Expired entries are pruned on access.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<dashmap::DashMap<String, VecDeque<u64>>>,
    max_requests: u32,
    window_seconds: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(MAX_REQUESTS, WINDOW_SECONDS)
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            windows: Arc::new(dashmap::DashMap::new()),
            max_requests,
            window_seconds,
        }
    }

    /// Check and record one request. `Ok((remaining, reset_seconds))` when
    /// admitted, `Err(retry_after_seconds)` when over the limit.
    pub fn check(&self, key: &str) -> Result<(u32, u64), u64> {
        let now_ms = Self::now_ms();
        let window_start_ms = now_ms.saturating_sub(self.window_seconds * 1000);

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(VecDeque::new);
        let timestamps = entry.value_mut();

        while timestamps.front().is_some_and(|&ts| ts < window_start_ms) {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.max_requests as usize {
            let oldest = timestamps.front().copied().unwrap_or(now_ms);
            let elapsed = now_ms.saturating_sub(oldest);
            let remaining_ms = (self.window_seconds * 1000).saturating_sub(elapsed);
            return Err((remaining_ms / 1000).max(1));
        }

        timestamps.push_back(now_ms);

        let used = timestamps.len() as u32;
        let reset = timestamps.front().map_or(0, |&oldest| {
            let elapsed = now_ms.saturating_sub(oldest);
            (self.window_seconds * 1000).saturating_sub(elapsed) / 1000
        });
        Ok((self.max_requests.saturating_sub(used), reset))
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Axum middleware applying the limiter per source address, with the
/// standard quota headers on every response.
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let key = addr.ip().to_string();
    match state.rate_limiter.check(&key) {
        Ok((remaining, reset)) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                "x-ratelimit-limit",
                HeaderValue::from(state.rate_limiter.max_requests),
            );
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
            response
        }
        Err(retry_after) => {
            let mut response = AppError::rate_limited(retry_after).into_response();
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(retry_after));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("1.2.3.4").is_ok());
        let (remaining, _) = limiter.check("1.2.3.4").expect("third");
        assert_eq!(remaining, 0);

        let retry = limiter.check("1.2.3.4").expect_err("fourth");
        assert!(retry >= 1);
    }

    #[test]
    fn addresses_are_isolated() {
        let limiter = RateLimiter::new(1, 60);
        limiter.check("1.1.1.1").expect("first of a");
        limiter.check("2.2.2.2").expect("first of b");
        assert!(limiter.check("1.1.1.1").is_err());
    }
}
