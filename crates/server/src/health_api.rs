//! Health endpoint
//!
//! Probes the relational store and the key-value store, reporting
//! per-component status and latency. 200 when everything is healthy,
//! 503 otherwise.

use std::sync::Arc;

use atelier_core::health::ComponentHealth;
use atelier_ports::HealthProbe;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;

#[derive(Clone)]
pub struct HealthApiState {
    pub probes: Arc<Vec<Arc<dyn HealthProbe>>>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "All components healthy"),
        (status = 503, description = "At least one component unhealthy")
    ),
    tag = "health"
)]
pub async fn health_handler(
    State(state): State<HealthApiState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut components: Vec<ComponentHealth> = Vec::with_capacity(state.probes.len());
    for probe in state.probes.iter() {
        components.push(probe.check().await);
    }

    let healthy = components.iter().all(|c| c.is_healthy());
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "components": components,
        })),
    )
}

pub fn health_routes(state: HealthApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}
