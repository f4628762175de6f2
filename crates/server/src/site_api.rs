//! Site REST API
//!
//! Site CRUD plus the publish/rollback/version-listing surface of the
//! build pipeline. Publish answers 202 with the BUILDING version and its
//! queued job.

use std::str::FromStr;
use std::sync::Arc;

use atelier_application::builder::PublishService;
use atelier_core::site::Site;
use atelier_core::{SiteId, SiteVersionId};
use atelier_ports::SiteRepository;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;

use crate::dtos::{
    CreateSiteRequestDto, Envelope, PaginatedDto, PaginationQuery, PublishResponseDto,
    RollbackRequestDto, SiteDto, SiteVersionDto, UpdateSiteRequestDto,
};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::middleware::AuthContext;

#[derive(Clone)]
pub struct SiteApiState {
    pub sites: Arc<dyn SiteRepository>,
    pub publish: Arc<PublishService>,
    pub cdn_base_url: Option<String>,
}

impl SiteApiState {
    fn site_dto(&self, site: Site) -> SiteDto {
        SiteDto::from_site(site, self.cdn_base_url.as_deref())
    }
}

pub(crate) fn parse_site_id(raw: &str) -> ApiResult<SiteId> {
    SiteId::from_str(raw).map_err(|_| ApiError::validation("invalid site id"))
}

#[utoipa::path(
    get,
    path = "/api/sites",
    params(("page" = Option<u32>, Query), ("limit" = Option<u32>, Query)),
    responses((status = 200, description = "Paginated sites", body = PaginatedDto<SiteDto>)),
    tag = "sites"
)]
pub async fn list_sites_handler(
    State(state): State<SiteApiState>,
    auth: AuthContext,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Json<PaginatedDto<SiteDto>>> {
    let page = state
        .sites
        .list(auth.tenant_id, query.to_request())
        .await
        .map_err(ApiError::from)?;
    Ok(Json(PaginatedDto::from_page(page, |s| {
        SiteDto::from_site(s, state.cdn_base_url.as_deref())
    })))
}

#[utoipa::path(
    post,
    path = "/api/sites",
    request_body = CreateSiteRequestDto,
    responses(
        (status = 201, description = "Site created", body = Envelope<SiteDto>),
        (status = 409, description = "Slug or subdomain taken")
    ),
    tag = "sites"
)]
pub async fn create_site_handler(
    State(state): State<SiteApiState>,
    auth: AuthContext,
    ApiJson(request): ApiJson<CreateSiteRequestDto>,
) -> ApiResult<(StatusCode, Json<Envelope<SiteDto>>)> {
    let site = Site::new(
        auth.tenant_id,
        request.name,
        request.slug,
        request.subdomain,
        request.settings.unwrap_or_default(),
    )
    .map_err(ApiError::from)?;
    state.sites.create(&site).await.map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(Envelope::new(state.site_dto(site)))))
}

#[utoipa::path(
    get,
    path = "/api/sites/{id}",
    params(("id" = String, Path)),
    responses(
        (status = 200, description = "Site", body = Envelope<SiteDto>),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "sites"
)]
pub async fn get_site_handler(
    State(state): State<SiteApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope<SiteDto>>> {
    let id = parse_site_id(&id)?;
    let site = state
        .sites
        .get(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("site {id}")))?;
    Ok(Json(Envelope::new(state.site_dto(site))))
}

#[utoipa::path(
    put,
    path = "/api/sites/{id}",
    params(("id" = String, Path)),
    request_body = UpdateSiteRequestDto,
    responses(
        (status = 200, description = "Site updated", body = Envelope<SiteDto>),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "sites"
)]
pub async fn update_site_handler(
    State(state): State<SiteApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<UpdateSiteRequestDto>,
) -> ApiResult<Json<Envelope<SiteDto>>> {
    let id = parse_site_id(&id)?;
    let mut site = state
        .sites
        .get(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("site {id}")))?;

    if let Some(name) = request.name {
        site.name = name;
    }
    if let Some(settings) = request.settings {
        site.settings = settings;
    }
    site.updated_at = Utc::now();

    state.sites.update(&site).await.map_err(ApiError::from)?;
    Ok(Json(Envelope::new(state.site_dto(site))))
}

#[utoipa::path(
    delete,
    path = "/api/sites/{id}",
    params(("id" = String, Path)),
    responses(
        (status = 204, description = "Site deleted; versions and pages cascade"),
        (status = 404, description = "Not found under this tenant")
    ),
    tag = "sites"
)]
pub async fn delete_site_handler(
    State(state): State<SiteApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_site_id(&id)?;
    state
        .sites
        .delete(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/sites/{id}/publish",
    params(("id" = String, Path)),
    responses(
        (status = 202, description = "Build enqueued", body = Envelope<PublishResponseDto>),
        (status = 400, description = "Site has no published pages")
    ),
    tag = "sites"
)]
pub async fn publish_site_handler(
    State(state): State<SiteApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Envelope<PublishResponseDto>>)> {
    let id = parse_site_id(&id)?;
    let (version, job) = state
        .publish
        .publish(auth.tenant_id, id)
        .await
        .map_err(ApiError::from)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Envelope::new(PublishResponseDto {
            version: version.into(),
            build_job: job.into(),
        })),
    ))
}

#[utoipa::path(
    post,
    path = "/api/sites/{id}/rollback",
    params(("id" = String, Path)),
    request_body = RollbackRequestDto,
    responses(
        (status = 200, description = "Prior version activated", body = Envelope<SiteVersionDto>),
        (status = 400, description = "Target version is not READY or SUPERSEDED")
    ),
    tag = "sites"
)]
pub async fn rollback_site_handler(
    State(state): State<SiteApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<RollbackRequestDto>,
) -> ApiResult<Json<Envelope<SiteVersionDto>>> {
    let id = parse_site_id(&id)?;
    let version = state
        .publish
        .rollback(
            auth.tenant_id,
            id,
            SiteVersionId::from_uuid(request.version_id),
        )
        .await
        .map_err(ApiError::from)?;
    Ok(Json(Envelope::new(version.into())))
}

#[utoipa::path(
    get,
    path = "/api/sites/{id}/versions",
    params(("id" = String, Path), ("page" = Option<u32>, Query), ("limit" = Option<u32>, Query)),
    responses((status = 200, description = "Paginated versions", body = PaginatedDto<SiteVersionDto>)),
    tag = "sites"
)]
pub async fn list_versions_handler(
    State(state): State<SiteApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Json<PaginatedDto<SiteVersionDto>>> {
    let id = parse_site_id(&id)?;
    let page = state
        .publish
        .list_versions(auth.tenant_id, id, query.to_request())
        .await
        .map_err(ApiError::from)?;
    Ok(Json(PaginatedDto::from_page(page, SiteVersionDto::from)))
}

pub fn site_routes(state: SiteApiState) -> Router {
    Router::new()
        .route("/sites", get(list_sites_handler).post(create_site_handler))
        .route(
            "/sites/{id}",
            get(get_site_handler)
                .put(update_site_handler)
                .delete(delete_site_handler),
        )
        .route("/sites/{id}/publish", post(publish_site_handler))
        .route("/sites/{id}/rollback", post(rollback_site_handler))
        .route("/sites/{id}/versions", get(list_versions_handler))
        .with_state(state)
}
