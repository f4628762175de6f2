//! Wire DTOs
//!
//! camelCase request/response shapes with `From` conversions to and from
//! the domain entities, plus the OpenAPI schema derives.

use atelier_core::content::PageContent;
use atelier_core::event::RunEvent;
use atelier_core::pagination::{PageInfo, Paginated};
use atelier_core::run::{Run, Step};
use atelier_core::site::{Page, Site, SiteSettings};
use atelier_core::version::{BuildJob, SiteVersion};
use atelier_core::workflow::{Workflow, WorkflowDefinition};
use atelier_core::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

// ---- common ----

#[derive(Debug, Deserialize, ToSchema)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PaginationQuery {
    pub fn to_request(&self) -> atelier_core::pagination::PageRequest {
        atelier_core::pagination::PageRequest::new(self.page, self.limit)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedDto<T: Serialize> {
    pub data: Vec<T>,
    #[schema(value_type = Object)]
    pub pagination: PageInfo,
}

impl<T: Serialize> PaginatedDto<T> {
    pub fn from_page<S>(page: Paginated<S>, f: impl FnMut(S) -> T) -> Self {
        let mapped = page.map(f);
        Self {
            data: mapped.data,
            pagination: mapped.pagination,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

// ---- auth ----

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequestDto {
    pub tenant_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequestDto {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponseDto {
    pub token: String,
    pub user: UserDto,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub role: String,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        Self {
            id: user.id.as_uuid(),
            tenant_id: user.tenant_id.as_uuid(),
            email: user.email,
            role: user.role.as_str().to_string(),
        }
    }
}

// ---- workflows ----

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkflowRequestDto {
    pub name: String,
    #[schema(value_type = Object)]
    pub definition: WorkflowDefinition,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateWorkflowRequestDto {
    pub name: Option<String>,
    #[schema(value_type = Object)]
    pub definition: Option<WorkflowDefinition>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDto {
    pub id: Uuid,
    pub name: String,
    pub version: i32,
    #[schema(value_type = Object)]
    pub definition: WorkflowDefinition,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Workflow> for WorkflowDto {
    fn from(w: Workflow) -> Self {
        Self {
            id: w.id.as_uuid(),
            name: w.name,
            version: w.version,
            definition: w.definition,
            is_active: w.is_active,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExecuteRequestDto {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub input: Value,
}

// ---- runs ----

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunDto {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    #[schema(value_type = Object)]
    pub input: Value,
    #[schema(value_type = Object)]
    pub output: Option<Value>,
    pub error: Option<String>,
    pub current_step_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Run> for RunDto {
    fn from(r: Run) -> Self {
        Self {
            id: r.id.as_uuid(),
            workflow_id: r.workflow_id.as_uuid(),
            status: r.status.as_str().to_string(),
            input: r.input,
            output: r.output,
            error: r.error,
            current_step_key: r.current_step_key,
            started_at: r.started_at,
            completed_at: r.completed_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepDto {
    pub id: Uuid,
    pub step_key: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub status: String,
    #[schema(value_type = Object)]
    pub input: Option<Value>,
    #[schema(value_type = Object)]
    pub output: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Step> for StepDto {
    fn from(s: Step) -> Self {
        Self {
            id: s.id.as_uuid(),
            step_key: s.step_key,
            node_type: s.node_type.as_str().to_string(),
            status: s.status.as_str().to_string(),
            input: s.input,
            output: s.output,
            error: s.error,
            retry_count: s.retry_count,
            started_at: s.started_at,
            completed_at: s.completed_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunWithStepsDto {
    #[serde(flatten)]
    pub run: RunDto,
    pub steps: Vec<StepDto>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_key: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl From<RunEvent> for EventDto {
    fn from(e: RunEvent) -> Self {
        Self {
            id: e.id.as_uuid(),
            run_id: e.run_id.as_uuid(),
            step_key: e.step_key,
            event_type: e.event_type.as_str().to_string(),
            payload: e.payload,
            timestamp: e.timestamp,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EventsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// RFC 3339; unparsable values are ignored.
    pub since: Option<String>,
}

// ---- sites ----

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteRequestDto {
    pub name: String,
    pub slug: String,
    pub subdomain: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub settings: Option<SiteSettings>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSiteRequestDto {
    pub name: Option<String>,
    #[schema(value_type = Object)]
    pub settings: Option<SiteSettings>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteDto {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub subdomain: String,
    /// Where the site is served from: the CDN prefix when configured,
    /// the local `/serve` surface otherwise.
    pub public_url: String,
    #[schema(value_type = Object)]
    pub settings: SiteSettings,
    pub active_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SiteDto {
    pub fn from_site(s: Site, cdn_base_url: Option<&str>) -> Self {
        let public_url = match cdn_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), s.subdomain),
            None => format!("/serve/{}", s.subdomain),
        };
        Self {
            id: s.id.as_uuid(),
            name: s.name,
            slug: s.slug,
            subdomain: s.subdomain,
            public_url,
            settings: s.settings,
            active_version_id: s.active_version_id.map(|id| id.as_uuid()),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

// ---- pages ----

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePageRequestDto {
    pub path: String,
    pub title: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub content: PageContent,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    #[serde(default = "default_true")]
    pub is_published: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePageRequestDto {
    pub path: Option<String>,
    pub title: Option<String>,
    #[schema(value_type = Object)]
    pub content: Option<PageContent>,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub is_published: Option<bool>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageDto {
    pub id: Uuid,
    pub site_id: Uuid,
    pub path: String,
    pub title: String,
    #[schema(value_type = Object)]
    pub content: PageContent,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub is_published: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Page> for PageDto {
    fn from(p: Page) -> Self {
        Self {
            id: p.id.as_uuid(),
            site_id: p.site_id.as_uuid(),
            path: p.path,
            title: p.title,
            content: p.content,
            seo_title: p.seo_title,
            seo_description: p.seo_description,
            is_published: p.is_published,
            sort_order: p.sort_order,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

// ---- versions ----

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteVersionDto {
    pub id: Uuid,
    pub site_id: Uuid,
    pub version: i32,
    pub status: String,
    pub page_count: i32,
    pub asset_size: i64,
    pub manifest_hash: Option<String>,
    pub build_duration_ms: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<SiteVersion> for SiteVersionDto {
    fn from(v: SiteVersion) -> Self {
        Self {
            id: v.id.as_uuid(),
            site_id: v.site_id.as_uuid(),
            version: v.version,
            status: v.status.as_str().to_string(),
            page_count: v.page_count,
            asset_size: v.asset_size,
            manifest_hash: v.manifest_hash,
            build_duration_ms: v.build_duration_ms,
            published_at: v.published_at,
            created_at: v.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildJobDto {
    pub id: Uuid,
    pub site_version_id: Uuid,
    pub status: String,
    pub retry_count: u32,
    pub error: Option<String>,
}

impl From<BuildJob> for BuildJobDto {
    fn from(j: BuildJob) -> Self {
        Self {
            id: j.id.as_uuid(),
            site_version_id: j.site_version_id.as_uuid(),
            status: j.status.as_str().to_string(),
            retry_count: j.retry_count,
            error: j.error,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponseDto {
    pub version: SiteVersionDto,
    pub build_job: BuildJobDto,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequestDto {
    pub version_id: Uuid,
}
