//! Page REST API
//!
//! Pages nest under their site; every operation first resolves the site
//! under the caller's tenant. Edits affect the next publish only.

use std::str::FromStr;
use std::sync::Arc;

use atelier_core::site::{validate_page_path, Page};
use atelier_core::{PageId, SiteId, TenantId};
use atelier_ports::{PageRepository, SiteRepository};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, put};
use axum::Router;
use chrono::Utc;

use crate::dtos::{
    CreatePageRequestDto, Envelope, PageDto, PaginatedDto, PaginationQuery, UpdatePageRequestDto,
};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::middleware::AuthContext;
use crate::site_api::parse_site_id;

#[derive(Clone)]
pub struct PageApiState {
    pub sites: Arc<dyn SiteRepository>,
    pub pages: Arc<dyn PageRepository>,
}

impl PageApiState {
    /// Tenant predicate: pages are only reachable through an owned site.
    async fn owned_site(&self, tenant_id: TenantId, site_id: SiteId) -> ApiResult<()> {
        self.sites
            .get(tenant_id, site_id)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found(format!("site {site_id}")))?;
        Ok(())
    }
}

fn parse_page_id(raw: &str) -> ApiResult<PageId> {
    PageId::from_str(raw).map_err(|_| ApiError::validation("invalid page id"))
}

#[utoipa::path(
    get,
    path = "/api/sites/{id}/pages",
    params(("id" = String, Path), ("page" = Option<u32>, Query), ("limit" = Option<u32>, Query)),
    responses((status = 200, description = "Paginated pages", body = PaginatedDto<PageDto>)),
    tag = "pages"
)]
pub async fn list_pages_handler(
    State(state): State<PageApiState>,
    auth: AuthContext,
    Path(site_id): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Json<PaginatedDto<PageDto>>> {
    let site_id = parse_site_id(&site_id)?;
    state.owned_site(auth.tenant_id, site_id).await?;
    let page = state
        .pages
        .list(site_id, query.to_request())
        .await
        .map_err(ApiError::from)?;
    Ok(Json(PaginatedDto::from_page(page, PageDto::from)))
}

#[utoipa::path(
    post,
    path = "/api/sites/{id}/pages",
    params(("id" = String, Path)),
    request_body = CreatePageRequestDto,
    responses(
        (status = 201, description = "Page created", body = Envelope<PageDto>),
        (status = 409, description = "Path already exists on this site")
    ),
    tag = "pages"
)]
pub async fn create_page_handler(
    State(state): State<PageApiState>,
    auth: AuthContext,
    Path(site_id): Path<String>,
    ApiJson(request): ApiJson<CreatePageRequestDto>,
) -> ApiResult<(StatusCode, Json<Envelope<PageDto>>)> {
    let site_id = parse_site_id(&site_id)?;
    state.owned_site(auth.tenant_id, site_id).await?;

    let mut page = Page::new(site_id, request.path, request.title, request.content)
        .map_err(ApiError::from)?;
    page.seo_title = request.seo_title;
    page.seo_description = request.seo_description;
    page.is_published = request.is_published;
    page.sort_order = request.sort_order;

    state.pages.create(&page).await.map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(Envelope::new(page.into()))))
}

#[utoipa::path(
    put,
    path = "/api/sites/{id}/pages/{pageId}",
    params(("id" = String, Path), ("pageId" = String, Path)),
    request_body = UpdatePageRequestDto,
    responses(
        (status = 200, description = "Page updated; takes effect on the next publish", body = Envelope<PageDto>),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "pages"
)]
pub async fn update_page_handler(
    State(state): State<PageApiState>,
    auth: AuthContext,
    Path((site_id, page_id)): Path<(String, String)>,
    ApiJson(request): ApiJson<UpdatePageRequestDto>,
) -> ApiResult<Json<Envelope<PageDto>>> {
    let site_id = parse_site_id(&site_id)?;
    let page_id = parse_page_id(&page_id)?;
    state.owned_site(auth.tenant_id, site_id).await?;

    let mut page = state
        .pages
        .get(site_id, page_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("page {page_id}")))?;

    if let Some(path) = request.path {
        validate_page_path(&path).map_err(ApiError::from)?;
        page.path = path;
    }
    if let Some(title) = request.title {
        page.title = title;
    }
    if let Some(content) = request.content {
        page.content = content;
    }
    if request.seo_title.is_some() {
        page.seo_title = request.seo_title;
    }
    if request.seo_description.is_some() {
        page.seo_description = request.seo_description;
    }
    if let Some(is_published) = request.is_published {
        page.is_published = is_published;
    }
    if let Some(sort_order) = request.sort_order {
        page.sort_order = sort_order;
    }
    page.updated_at = Utc::now();

    state.pages.update(&page).await.map_err(ApiError::from)?;
    Ok(Json(Envelope::new(page.into())))
}

#[utoipa::path(
    delete,
    path = "/api/sites/{id}/pages/{pageId}",
    params(("id" = String, Path), ("pageId" = String, Path)),
    responses(
        (status = 204, description = "Page deleted"),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "pages"
)]
pub async fn delete_page_handler(
    State(state): State<PageApiState>,
    auth: AuthContext,
    Path((site_id, page_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let site_id = parse_site_id(&site_id)?;
    let page_id = parse_page_id(&page_id)?;
    state.owned_site(auth.tenant_id, site_id).await?;
    state
        .pages
        .delete(site_id, page_id)
        .await
        .map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn page_routes(state: PageApiState) -> Router {
    Router::new()
        .route(
            "/sites/{id}/pages",
            get(list_pages_handler).post(create_page_handler),
        )
        .route(
            "/sites/{id}/pages/{pageId}",
            put(update_page_handler).delete(delete_page_handler),
        )
        .with_state(state)
}
