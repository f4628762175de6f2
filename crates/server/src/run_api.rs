//! Run REST API
//!
//! Read a run with its steps, page through its event log, and cancel it.

use std::str::FromStr;
use std::sync::Arc;

use atelier_application::workflow::WorkflowEngine;
use atelier_core::pagination::PageRequest;
use atelier_core::RunId;
use atelier_ports::{EventRepository, RunRepository};
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::DateTime;

use crate::dtos::{Envelope, EventDto, EventsQuery, PaginatedDto, RunDto, RunWithStepsDto, StepDto};
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthContext;

#[derive(Clone)]
pub struct RunApiState {
    pub runs: Arc<dyn RunRepository>,
    pub events: Arc<dyn EventRepository>,
    pub engine: Arc<WorkflowEngine>,
}

fn parse_id(raw: &str) -> ApiResult<RunId> {
    RunId::from_str(raw).map_err(|_| ApiError::validation("invalid run id"))
}

#[utoipa::path(
    get,
    path = "/api/runs/{id}",
    params(("id" = String, Path)),
    responses(
        (status = 200, description = "Run with its steps", body = Envelope<RunWithStepsDto>),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "runs"
)]
pub async fn get_run_handler(
    State(state): State<RunApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope<RunWithStepsDto>>> {
    let id = parse_id(&id)?;
    let run = state
        .runs
        .get_run(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("run {id}")))?;
    let steps = state.runs.list_steps(id).await.map_err(ApiError::from)?;

    Ok(Json(Envelope::new(RunWithStepsDto {
        run: run.into(),
        steps: steps.into_iter().map(StepDto::from).collect(),
    })))
}

#[utoipa::path(
    get,
    path = "/api/runs/{id}/events",
    params(
        ("id" = String, Path),
        ("since" = Option<String>, Query, description = "RFC 3339; unparsable values are ignored"),
        ("page" = Option<u32>, Query),
        ("limit" = Option<u32>, Query)
    ),
    responses((status = 200, description = "Paginated events after the given instant", body = PaginatedDto<EventDto>)),
    tag = "runs"
)]
pub async fn list_events_handler(
    State(state): State<RunApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<PaginatedDto<EventDto>>> {
    let id = parse_id(&id)?;
    // Tenant check happens on the run itself; events carry no tenant.
    state
        .runs
        .get_run(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("run {id}")))?;

    // A non-parsable `since` is ignored, not rejected.
    let since = query
        .since
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.to_utc());

    let page = state
        .events
        .list(id, since, PageRequest::new(query.page, query.limit))
        .await
        .map_err(ApiError::from)?;
    Ok(Json(PaginatedDto::from_page(page, EventDto::from)))
}

#[utoipa::path(
    post,
    path = "/api/runs/{id}/cancel",
    params(("id" = String, Path)),
    responses(
        (status = 200, description = "Run cancelled; pending steps skipped", body = Envelope<RunDto>),
        (status = 400, description = "Run already terminal"),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "runs"
)]
pub async fn cancel_run_handler(
    State(state): State<RunApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope<RunDto>>> {
    let id = parse_id(&id)?;
    let run = state
        .engine
        .cancel_run(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(Envelope::new(run.into())))
}

pub fn run_routes(state: RunApiState) -> Router {
    Router::new()
        .route("/runs/{id}", get(get_run_handler))
        .route("/runs/{id}/events", get(list_events_handler))
        .route("/runs/{id}/cancel", post(cancel_run_handler))
        .with_state(state)
}
