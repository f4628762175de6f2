//! Workflow REST API
//!
//! CRUD over workflow definitions plus Execute. Updates bump the version;
//! deletion is a soft delete so runs stay readable.

use std::str::FromStr;
use std::sync::Arc;

use atelier_application::workflow::WorkflowEngine;
use atelier_core::workflow::Workflow;
use atelier_core::WorkflowId;
use atelier_ports::{RunRepository, WorkflowRepository};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;

use crate::dtos::{
    CreateWorkflowRequestDto, Envelope, ExecuteRequestDto, PaginatedDto, PaginationQuery, RunDto,
    UpdateWorkflowRequestDto, WorkflowDto,
};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::middleware::AuthContext;

#[derive(Clone)]
pub struct WorkflowApiState {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub engine: Arc<WorkflowEngine>,
}

fn parse_id(raw: &str) -> ApiResult<WorkflowId> {
    WorkflowId::from_str(raw).map_err(|_| ApiError::validation("invalid workflow id"))
}

#[utoipa::path(
    get,
    path = "/api/workflows",
    params(("page" = Option<u32>, Query), ("limit" = Option<u32>, Query)),
    responses((status = 200, description = "Paginated workflows", body = PaginatedDto<WorkflowDto>)),
    tag = "workflows"
)]
pub async fn list_workflows_handler(
    State(state): State<WorkflowApiState>,
    auth: AuthContext,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Json<PaginatedDto<WorkflowDto>>> {
    let page = state
        .workflows
        .list(auth.tenant_id, query.to_request())
        .await
        .map_err(ApiError::from)?;
    Ok(Json(PaginatedDto::from_page(page, WorkflowDto::from)))
}

#[utoipa::path(
    post,
    path = "/api/workflows",
    request_body = CreateWorkflowRequestDto,
    responses(
        (status = 201, description = "Workflow created", body = Envelope<WorkflowDto>),
        (status = 400, description = "Invalid definition")
    ),
    tag = "workflows"
)]
pub async fn create_workflow_handler(
    State(state): State<WorkflowApiState>,
    auth: AuthContext,
    ApiJson(request): ApiJson<CreateWorkflowRequestDto>,
) -> ApiResult<(StatusCode, Json<Envelope<WorkflowDto>>)> {
    let workflow = Workflow::new(auth.tenant_id, request.name, request.definition)
        .map_err(ApiError::from)?;
    state
        .workflows
        .create(&workflow)
        .await
        .map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(Envelope::new(workflow.into()))))
}

#[utoipa::path(
    get,
    path = "/api/workflows/{id}",
    params(("id" = String, Path)),
    responses(
        (status = 200, description = "Workflow", body = Envelope<WorkflowDto>),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "workflows"
)]
pub async fn get_workflow_handler(
    State(state): State<WorkflowApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope<WorkflowDto>>> {
    let id = parse_id(&id)?;
    let workflow = state
        .workflows
        .get(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("workflow {id}")))?;
    Ok(Json(Envelope::new(workflow.into())))
}

#[utoipa::path(
    put,
    path = "/api/workflows/{id}",
    params(("id" = String, Path)),
    request_body = UpdateWorkflowRequestDto,
    responses(
        (status = 200, description = "Workflow updated; definition changes bump the version", body = Envelope<WorkflowDto>),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "workflows"
)]
pub async fn update_workflow_handler(
    State(state): State<WorkflowApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<UpdateWorkflowRequestDto>,
) -> ApiResult<Json<Envelope<WorkflowDto>>> {
    let id = parse_id(&id)?;
    let mut workflow = state
        .workflows
        .get(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("workflow {id}")))?;

    if let Some(name) = request.name {
        workflow.name = name;
        workflow.updated_at = Utc::now();
    }
    if let Some(definition) = request.definition {
        workflow.update_definition(definition).map_err(ApiError::from)?;
    }

    state
        .workflows
        .update(&workflow)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(Envelope::new(workflow.into())))
}

#[utoipa::path(
    delete,
    path = "/api/workflows/{id}",
    params(("id" = String, Path)),
    responses(
        (status = 204, description = "Soft-deleted; runs stay readable"),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "workflows"
)]
pub async fn delete_workflow_handler(
    State(state): State<WorkflowApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let mut workflow = state
        .workflows
        .get(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("workflow {id}")))?;

    workflow.deactivate();
    state
        .workflows
        .update(&workflow)
        .await
        .map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/workflows/{id}/execute",
    params(("id" = String, Path)),
    request_body = ExecuteRequestDto,
    responses(
        (status = 202, description = "Run accepted", body = Envelope<RunDto>),
        (status = 400, description = "Inactive workflow or invalid definition")
    ),
    tag = "workflows"
)]
pub async fn execute_workflow_handler(
    State(state): State<WorkflowApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ExecuteRequestDto>,
) -> ApiResult<(StatusCode, Json<Envelope<RunDto>>)> {
    let id = parse_id(&id)?;
    let run = state
        .engine
        .start_run(auth.tenant_id, id, request.input)
        .await
        .map_err(ApiError::from)?;
    Ok((StatusCode::ACCEPTED, Json(Envelope::new(run.into()))))
}

#[utoipa::path(
    get,
    path = "/api/workflows/{id}/runs",
    params(("id" = String, Path), ("page" = Option<u32>, Query), ("limit" = Option<u32>, Query)),
    responses((status = 200, description = "Paginated runs", body = PaginatedDto<RunDto>)),
    tag = "workflows"
)]
pub async fn list_runs_handler(
    State(state): State<WorkflowApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Json<PaginatedDto<RunDto>>> {
    let id = parse_id(&id)?;
    let page = state
        .runs
        .list_runs(auth.tenant_id, id, query.to_request())
        .await
        .map_err(ApiError::from)?;
    Ok(Json(PaginatedDto::from_page(page, RunDto::from)))
}

pub fn workflow_routes(state: WorkflowApiState) -> Router {
    Router::new()
        .route(
            "/workflows",
            get(list_workflows_handler).post(create_workflow_handler),
        )
        .route(
            "/workflows/{id}",
            get(get_workflow_handler)
                .put(update_workflow_handler)
                .delete(delete_workflow_handler),
        )
        .route("/workflows/{id}/execute", post(execute_workflow_handler))
        .route("/workflows/{id}/runs", get(list_runs_handler))
        .with_state(state)
}
