//! Centralized router
//!
//! Assembles both services' routes behind the shared middleware stack:
//! request-id and tracing on everything, CORS per environment, the
//! fixed-window rate limiter in front of all `/api` routes, and the
//! bearer guard on everything except `/api/auth`. `/serve`, `/health`,
//! `/ws` and the docs sit outside `/api`.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_docs::ApiDoc;
use crate::auth_api::{auth_routes, AuthApiState};
use crate::bootstrap::AppContext;
use crate::health_api::{health_routes, HealthApiState};
use crate::middleware::{
    add_request_id, auth_guard, cors_layer, rate_limit, trace_requests, RateLimiter,
};
use crate::page_api::{page_routes, PageApiState};
use crate::run_api::{run_routes, RunApiState};
use crate::serve_api::{serve_routes, ServeApiState};
use crate::site_api::{site_routes, SiteApiState};
use crate::workflow_api::{workflow_routes, WorkflowApiState};
use crate::ws::{ws_routes, WsApiState};

const RATE_LIMIT_PER_MINUTE: u32 = 100;

pub fn create_api_router(ctx: &AppContext) -> Router {
    let limiter = Arc::new(RateLimiter::new(
        RATE_LIMIT_PER_MINUTE,
        Duration::from_secs(60),
    ));

    let mut protected = Router::new();
    if ctx.config.mode.serves_workflow() {
        protected = protected
            .merge(workflow_routes(WorkflowApiState {
                workflows: ctx.workflows.clone(),
                runs: ctx.runs.clone(),
                engine: ctx.engine.clone(),
            }))
            .merge(run_routes(RunApiState {
                runs: ctx.runs.clone(),
                events: ctx.events.clone(),
                engine: ctx.engine.clone(),
            }));
    }
    if ctx.config.mode.serves_builder() {
        protected = protected
            .merge(site_routes(SiteApiState {
                sites: ctx.sites.clone(),
                publish: ctx.publish.clone(),
                cdn_base_url: ctx.config.cdn_base_url.clone(),
            }))
            .merge(page_routes(PageApiState {
                sites: ctx.sites.clone(),
                pages: ctx.pages.clone(),
            }));
    }
    let protected = protected.layer(from_fn_with_state(ctx.tokens.clone(), auth_guard));

    let api = Router::new()
        .merge(auth_routes(AuthApiState {
            auth: ctx.auth.clone(),
        }))
        .merge(protected)
        .layer(from_fn_with_state(limiter, rate_limit));

    let mut app = Router::new()
        .nest("/api", api)
        .merge(health_routes(HealthApiState {
            probes: ctx.probes.clone(),
        }))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    if ctx.config.mode.serves_workflow() {
        app = app.merge(ws_routes(WsApiState {
            tokens: ctx.tokens.clone(),
            runs: ctx.runs.clone(),
            bus: ctx.push_bus.clone(),
        }));
    }
    if ctx.config.mode.serves_builder() {
        app = app.merge(serve_routes(ServeApiState {
            resolver: ctx.resolver.clone(),
        }));
    }

    app.layer(cors_layer(ctx.config.env))
        .layer(from_fn(trace_requests))
        .layer(from_fn(add_request_id))
}
