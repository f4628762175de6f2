//! Build engine and worker
//!
//! `ExecuteBuild` renders the site's current published pages, uploads
//! them with their manifest under the version's artifact prefix, and
//! flips `activeVersionId` in one transaction. A failed build leaves the
//! pointer untouched so the site keeps serving the previous version.
//! Builds read page state at execution time, not at enqueue time.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::version::{
    page_path_to_file, sha256_hex, BuildJobStatus, Manifest, ManifestPage,
};
use atelier_core::{BuildJobId, DomainError, Result, SiteId, SiteVersionId, TenantId};
use atelier_ports::{
    BuildJobRepository, JobQueue, ObjectStore, PageRepository, SiteRepository,
    SiteVersionRepository,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use super::renderer;
use super::resolver::SiteResolver;

pub const BUILD_QUEUE: &str = "builder:builds";

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPayload {
    pub tenant_id: TenantId,
    pub site_id: SiteId,
    pub site_version_id: SiteVersionId,
    pub build_job_id: BuildJobId,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub worker_id: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            worker_id: format!("build-worker-{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

pub struct BuildEngine {
    sites: Arc<dyn SiteRepository>,
    pages: Arc<dyn PageRepository>,
    versions: Arc<dyn SiteVersionRepository>,
    jobs: Arc<dyn BuildJobRepository>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    resolver: Arc<SiteResolver>,
    config: BuildConfig,
}

impl BuildEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sites: Arc<dyn SiteRepository>,
        pages: Arc<dyn PageRepository>,
        versions: Arc<dyn SiteVersionRepository>,
        jobs: Arc<dyn BuildJobRepository>,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        resolver: Arc<SiteResolver>,
        config: BuildConfig,
    ) -> Self {
        Self {
            sites,
            pages,
            versions,
            jobs,
            store,
            queue,
            resolver,
            config,
        }
    }

    /// Worker entry point: claim, build, finalize or retry.
    pub async fn execute_build(&self, payload: &BuildPayload) -> Result<()> {
        let Some(mut job) = self
            .jobs
            .claim(payload.build_job_id, &self.config.worker_id)
            .await?
        else {
            // Already claimed or already terminal; duplicate delivery.
            return Ok(());
        };

        let started = std::time::Instant::now();
        match self.build(payload).await {
            Ok(outcome) => {
                let mut version = outcome.version;
                version.mark_ready(
                    outcome.manifest.pages.len() as i32,
                    outcome.manifest.total_size as i64,
                    outcome.manifest.checksum.clone(),
                    started.elapsed().as_millis() as i64,
                )?;
                job.status = BuildJobStatus::Completed;
                job.completed_at = Some(Utc::now());
                job.error = None;
                self.versions.finalize_build(&version, &job).await?;
                self.resolver.invalidate(&outcome.subdomain).await;
                info!(
                    site_id = %payload.site_id,
                    version = version.version,
                    pages = version.page_count,
                    duration_ms = version.build_duration_ms,
                    "build completed"
                );
                Ok(())
            }
            Err(e) => self.handle_failure(payload, job, e).await,
        }
    }

    async fn build(&self, payload: &BuildPayload) -> Result<BuildOutcome> {
        let site = self
            .sites
            .get(payload.tenant_id, payload.site_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("site {}", payload.site_id)))?;
        let version = self
            .versions
            .get(payload.site_id, payload.site_version_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!("site version {}", payload.site_version_id))
            })?;

        // Current state, not a snapshot from enqueue time.
        let pages = self.pages.list_published(payload.site_id).await?;
        if pages.is_empty() {
            return Err(DomainError::Build(
                "site has no published pages".to_string(),
            ));
        }

        let prefix = &version.artifact_prefix;
        let mut manifest_pages = Vec::with_capacity(pages.len());
        for page in &pages {
            let html = renderer::render_page(page, &site);
            let bytes = html.into_bytes();
            let hash = sha256_hex(&bytes);
            let key = format!("{prefix}/{}", page_path_to_file(&page.path));
            let size = bytes.len() as u64;
            self.store.put(&key, bytes, HTML_CONTENT_TYPE).await?;
            manifest_pages.push(ManifestPage {
                path: page.path.clone(),
                artifact_key: key,
                title: page.title.clone(),
                hash,
                size,
            });
        }

        let not_found = renderer::render_not_found(&site).into_bytes();
        self.store
            .put(&format!("{prefix}/404.html"), not_found, HTML_CONTENT_TYPE)
            .await?;

        let manifest = Manifest::new(
            version.version,
            site.id,
            payload.tenant_id,
            manifest_pages,
            Vec::new(),
        );
        let manifest_bytes = serde_json::to_vec(&manifest)
            .map_err(|e| DomainError::Build(format!("serialize manifest: {e}")))?;
        self.store
            .put(
                &format!("{prefix}/manifest.json"),
                manifest_bytes,
                "application/json",
            )
            .await?;

        Ok(BuildOutcome {
            version,
            manifest,
            subdomain: site.subdomain,
        })
    }

    /// Bounded retries re-queue the job; exhaustion fails the version and
    /// leaves the active pointer untouched.
    async fn handle_failure(
        &self,
        payload: &BuildPayload,
        mut job: atelier_core::version::BuildJob,
        e: DomainError,
    ) -> Result<()> {
        let message = e.to_string();
        warn!(
            site_id = %payload.site_id,
            job_id = %job.id,
            attempt = job.retry_count,
            error = %message,
            "build attempt failed"
        );

        if job.retry_count < self.config.max_retries {
            job.retry_count += 1;
            job.status = BuildJobStatus::Queued;
            job.worker_id = None;
            job.error = Some(message);
            self.jobs.update(&job).await?;

            let delay = self.config.retry_base_delay * 2u32.pow(job.retry_count - 1);
            let value = serde_json::to_value(payload)
                .map_err(|e| DomainError::Infrastructure(format!("serialize build job: {e}")))?;
            self.queue.enqueue_delayed(BUILD_QUEUE, value, delay).await?;
            return Ok(());
        }

        let mut version = self
            .versions
            .get(payload.site_id, payload.site_version_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!("site version {}", payload.site_version_id))
            })?;
        version.mark_failed()?;
        job.status = BuildJobStatus::Failed;
        job.error = Some(message.clone());
        job.completed_at = Some(Utc::now());
        self.versions.fail_build(&version, &job).await?;
        error!(site_id = %payload.site_id, version = version.version, error = %message, "build failed permanently");
        Ok(())
    }
}

struct BuildOutcome {
    version: atelier_core::version::SiteVersion,
    manifest: Manifest,
    subdomain: String,
}

/// Build worker pool: drains the build queue with bounded concurrency.
pub struct BuildWorker {
    engine: Arc<BuildEngine>,
    queue: Arc<dyn JobQueue>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl BuildWorker {
    pub fn new(engine: Arc<BuildEngine>, queue: Arc<dyn JobQueue>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            engine,
            queue,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("build worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                popped = self.queue.pop(BUILD_QUEUE, Duration::from_secs(1)) => {
                    match popped {
                        Ok(Some(payload)) => self.dispatch(payload).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "job store pop failed, backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
        info!("build worker stopped consuming");
        Ok(())
    }

    async fn dispatch(&self, payload: serde_json::Value) {
        let job: BuildPayload = match serde_json::from_value(payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "dropping malformed build job");
                return;
            }
        };
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let engine = self.engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.execute_build(&job).await {
                error!(job_id = %job.build_job_id, error = %e, "build execution errored");
            }
            drop(permit);
        });
    }

    pub async fn drain(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, async {
            let _all = self.semaphore.acquire_many(self.concurrency as u32).await;
        })
        .await
        .is_ok()
    }
}
