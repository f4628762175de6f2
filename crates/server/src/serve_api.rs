//! Public artifact serving
//!
//! `GET /serve/{subdomain}[/{...path}]`: no auth, no JSON envelope.
//! Responses carry `X-Site-Version` and the cache-control class the
//! resolver picked (immutable for assets, short-lived for pages).

use std::sync::Arc;

use atelier_application::builder::{Resolved, SiteResolver};
use atelier_core::DomainError;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

#[derive(Clone)]
pub struct ServeApiState {
    pub resolver: Arc<SiteResolver>,
}

fn to_response(resolved: Resolved) -> Response {
    let status = StatusCode::from_u16(resolved.status).unwrap_or(StatusCode::OK);
    let mut response = (status, resolved.bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&resolved.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(resolved.cache_control),
    );
    headers.insert("X-Site-Version", HeaderValue::from(resolved.version));
    response
}

fn plain_not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

async fn serve(state: &ServeApiState, subdomain: &str, path: &str) -> Response {
    match state.resolver.resolve(subdomain, path).await {
        Ok(resolved) => to_response(resolved),
        Err(DomainError::NotFound(_)) => plain_not_found(),
        Err(e) => {
            tracing::error!(subdomain, path, error = %e, "serve failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

pub async fn serve_root_handler(
    State(state): State<ServeApiState>,
    Path(subdomain): Path<String>,
) -> Response {
    serve(&state, &subdomain, "/").await
}

pub async fn serve_path_handler(
    State(state): State<ServeApiState>,
    Path((subdomain, path)): Path<(String, String)>,
) -> Response {
    serve(&state, &subdomain, &format!("/{path}")).await
}

pub fn serve_routes(state: ServeApiState) -> Router {
    Router::new()
        .route("/serve/{subdomain}", get(serve_root_handler))
        .route("/serve/{subdomain}/{*path}", get(serve_path_handler))
        .with_state(state)
}
