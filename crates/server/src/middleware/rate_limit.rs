//! Fixed-window rate limiter
//!
//! Default 100 requests per 60-second window, keyed by bearer token when
//! present (one client, one budget) and by forwarded client address
//! otherwise. Sits in front of every API route; `/serve` is exempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::ApiError;

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u32,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Returns the remaining budget, or `None` when the limit is hit.
    pub async fn check(&self, key: &str) -> Option<u32> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        // Opportunistic cleanup keeps the map bounded.
        if windows.len() > 10_000 {
            windows.retain(|_, w| now.duration_since(w.started_at) < self.window);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }
        if window.count >= self.limit {
            return None;
        }
        window.count += 1;
        Some(self.limit - window.count)
    }
}

fn client_key(req: &Request) -> String {
    if let Some(auth) = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        return format!("token:{auth}");
    }
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    format!("addr:{forwarded}")
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_key(&req);
    let Some(remaining) = limiter.check(&key).await else {
        return Err(ApiError::rate_limited());
    };

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from(limiter.limit),
    );
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enforces_the_window_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert_eq!(limiter.check("a").await, Some(2));
        assert_eq!(limiter.check("a").await, Some(1));
        assert_eq!(limiter.check("a").await, Some(0));
        assert_eq!(limiter.check("a").await, None);
        // Other keys have their own budget.
        assert_eq!(limiter.check("b").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_expiry() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a").await.is_some());
        assert!(limiter.check("a").await.is_none());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("a").await.is_some());
    }
}
