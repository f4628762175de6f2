//! HTTP middleware
//!
//! Request tracing, request-id stamping, CORS policy per environment, the
//! bearer-token auth guard, and the fixed-window rate limiter.

pub mod auth;
pub mod rate_limit;

use atelier_adapters::Environment;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

pub use auth::{auth_guard, AuthContext};
pub use rate_limit::{rate_limit, RateLimiter};

/// Permissive CORS in development; same-origin (no CORS headers) in
/// production.
pub fn cors_layer(env: Environment) -> CorsLayer {
    if env.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Log method, uri, status and duration; 4xx at warn, 5xx handled by the
/// error envelope itself.
pub async fn trace_requests(req: Request, next: Next) -> Response {
    let start = std::time::Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = next.run(req).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis() as u64;
    if status.is_client_error() {
        warn!(method = %method, uri = %uri, status = status.as_u16(), duration_ms, "request rejected");
    } else {
        info!(method = %method, uri = %uri, status = status.as_u16(), duration_ms, "request processed");
    }
    response
}

/// Stamp every response with an `X-Request-ID`.
pub async fn add_request_id(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}
