//! Site version and build job repository ports
//!
//! Activation and rollback are single port methods so the adapter can hold
//! one transaction around the whole pointer flip. Readers therefore observe
//! either the complete old version or the complete new one, never a mix.

use async_trait::async_trait;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::version::{BuildJob, SiteVersion};
use atelier_core::{BuildJobId, Result, SiteId, SiteVersionId, TenantId};

#[async_trait]
pub trait SiteVersionRepository: Send + Sync {
    /// `max(existing) + 1`, starting at 1. A unique `(site, version)`
    /// index backs the monotonicity invariant under concurrent publishes.
    async fn next_version_number(&self, site_id: SiteId) -> Result<i32>;

    /// Create the version and its build job in one transaction.
    async fn create_with_job(&self, version: &SiteVersion, job: &BuildJob) -> Result<()>;

    async fn get(&self, site_id: SiteId, id: SiteVersionId) -> Result<Option<SiteVersion>>;

    async fn list(&self, site_id: SiteId, page: PageRequest) -> Result<Paginated<SiteVersion>>;

    /// Successful build, one transaction: persist the READY version with
    /// its totals, mark the previously active version SUPERSEDED, point
    /// `Site.activeVersionId` at this version, complete the job.
    async fn finalize_build(&self, version: &SiteVersion, job: &BuildJob) -> Result<()>;

    /// Failed build, one transaction: version FAILED, job FAILED with the
    /// error message. The active pointer is left untouched.
    async fn fail_build(&self, version: &SiteVersion, job: &BuildJob) -> Result<()>;

    /// Rollback, one transaction: validate the target (READY or
    /// SUPERSEDED, owned by the site), promote it if superseded, supersede
    /// the current active version when distinct, flip the pointer.
    /// Returns the activated version.
    async fn rollback(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        target: SiteVersionId,
    ) -> Result<SiteVersion>;
}

#[async_trait]
pub trait BuildJobRepository: Send + Sync {
    async fn get(&self, id: BuildJobId) -> Result<Option<BuildJob>>;

    /// Compare-and-swap claim: QUEUED → PROCESSING, recording the worker
    /// id and start time. Returns `None` when the job was already claimed,
    /// which keeps at most one build per version in flight.
    async fn claim(&self, id: BuildJobId, worker_id: &str) -> Result<Option<BuildJob>>;

    async fn update(&self, job: &BuildJob) -> Result<()>;
}
