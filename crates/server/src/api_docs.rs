//! OpenAPI documentation
//!
//! Swagger UI at `/docs`, raw document at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::dtos::*;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Atelier API",
        description = "Workflow execution engine and versioned site builder",
        version = env!("CARGO_PKG_VERSION"),
    ),
    paths(
        crate::auth_api::register_handler,
        crate::auth_api::login_handler,
        crate::workflow_api::list_workflows_handler,
        crate::workflow_api::create_workflow_handler,
        crate::workflow_api::get_workflow_handler,
        crate::workflow_api::update_workflow_handler,
        crate::workflow_api::delete_workflow_handler,
        crate::workflow_api::execute_workflow_handler,
        crate::workflow_api::list_runs_handler,
        crate::run_api::get_run_handler,
        crate::run_api::list_events_handler,
        crate::run_api::cancel_run_handler,
        crate::site_api::list_sites_handler,
        crate::site_api::create_site_handler,
        crate::site_api::get_site_handler,
        crate::site_api::update_site_handler,
        crate::site_api::delete_site_handler,
        crate::site_api::publish_site_handler,
        crate::site_api::rollback_site_handler,
        crate::site_api::list_versions_handler,
        crate::page_api::list_pages_handler,
        crate::page_api::create_page_handler,
        crate::page_api::update_page_handler,
        crate::page_api::delete_page_handler,
        crate::health_api::health_handler,
    ),
    components(schemas(
        RegisterRequestDto,
        LoginRequestDto,
        AuthResponseDto,
        UserDto,
        CreateWorkflowRequestDto,
        UpdateWorkflowRequestDto,
        WorkflowDto,
        ExecuteRequestDto,
        RunDto,
        StepDto,
        RunWithStepsDto,
        EventDto,
        CreateSiteRequestDto,
        UpdateSiteRequestDto,
        SiteDto,
        CreatePageRequestDto,
        UpdatePageRequestDto,
        PageDto,
        SiteVersionDto,
        BuildJobDto,
        PublishResponseDto,
        RollbackRequestDto,
        Envelope<AuthResponseDto>,
        Envelope<WorkflowDto>,
        Envelope<RunDto>,
        Envelope<RunWithStepsDto>,
        Envelope<SiteDto>,
        Envelope<PageDto>,
        Envelope<SiteVersionDto>,
        Envelope<PublishResponseDto>,
        PaginatedDto<WorkflowDto>,
        PaginatedDto<RunDto>,
        PaginatedDto<EventDto>,
        PaginatedDto<SiteDto>,
        PaginatedDto<PageDto>,
        PaginatedDto<SiteVersionDto>,
    )),
    tags(
        (name = "auth", description = "Tenant registration and login"),
        (name = "workflows", description = "Workflow definitions and execution"),
        (name = "runs", description = "Run state, events and cancellation"),
        (name = "sites", description = "Sites, publishing and rollback"),
        (name = "pages", description = "Structured page content"),
        (name = "health", description = "Store reachability"),
    )
)]
pub struct ApiDoc;
