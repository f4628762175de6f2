//! Publish and rollback
//!
//! Publishing validates the site, allocates the next version number,
//! creates the BUILDING version with its QUEUED job in one transaction,
//! and enqueues the build. Activation happens later, in the build worker's
//! finalize transaction. Rollback flips the pointer to a prior READY or
//! SUPERSEDED version.

use std::sync::Arc;

use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::version::{BuildJob, SiteVersion};
use atelier_core::{DomainError, Result, SiteId, SiteVersionId, TenantId};
use atelier_ports::{JobQueue, PageRepository, SiteRepository, SiteVersionRepository};
use tracing::info;

use super::build_worker::{BuildPayload, BUILD_QUEUE};
use super::resolver::SiteResolver;

pub struct PublishService {
    sites: Arc<dyn SiteRepository>,
    pages: Arc<dyn PageRepository>,
    versions: Arc<dyn SiteVersionRepository>,
    queue: Arc<dyn JobQueue>,
    resolver: Arc<SiteResolver>,
}

impl PublishService {
    pub fn new(
        sites: Arc<dyn SiteRepository>,
        pages: Arc<dyn PageRepository>,
        versions: Arc<dyn SiteVersionRepository>,
        queue: Arc<dyn JobQueue>,
        resolver: Arc<SiteResolver>,
    ) -> Self {
        Self {
            sites,
            pages,
            versions,
            queue,
            resolver,
        }
    }

    /// Enqueue a build of the site's current published pages. Returns the
    /// BUILDING version and its QUEUED job; the caller answers 202.
    pub async fn publish(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
    ) -> Result<(SiteVersion, BuildJob)> {
        let site = self
            .sites
            .get(tenant_id, site_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("site {site_id}")))?;

        let published = self.pages.list_published(site_id).await?;
        if published.is_empty() {
            return Err(DomainError::validation_fields(
                "site has no published pages",
                vec!["pages".to_string()],
            ));
        }

        let number = self.versions.next_version_number(site_id).await?;
        let version = SiteVersion::new(tenant_id, site_id, number);
        let job = BuildJob::new(version.id, tenant_id);

        self.versions.create_with_job(&version, &job).await?;
        self.enqueue(&BuildPayload {
            tenant_id,
            site_id,
            site_version_id: version.id,
            build_job_id: job.id,
        })
        .await?;

        info!(site_id = %site_id, version = number, subdomain = %site.subdomain, "build enqueued");
        Ok((version, job))
    }

    /// Activate a prior version. The repository validates the target and
    /// performs the whole transition in one transaction.
    pub async fn rollback(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        target: SiteVersionId,
    ) -> Result<SiteVersion> {
        let site = self
            .sites
            .get(tenant_id, site_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("site {site_id}")))?;

        let version = self.versions.rollback(tenant_id, site_id, target).await?;
        self.resolver.invalidate(&site.subdomain).await;

        info!(site_id = %site_id, version = version.version, "rolled back");
        Ok(version)
    }

    pub async fn list_versions(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        page: PageRequest,
    ) -> Result<Paginated<SiteVersion>> {
        // Ownership check before the unscoped version listing.
        self.sites
            .get(tenant_id, site_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("site {site_id}")))?;
        self.versions.list(site_id, page).await
    }

    async fn enqueue(&self, payload: &BuildPayload) -> Result<()> {
        let value = serde_json::to_value(payload)
            .map_err(|e| DomainError::Infrastructure(format!("serialize build job: {e}")))?;
        self.queue.enqueue(BUILD_QUEUE, value).await
    }
}
