//! In-memory adapters
//!
//! One `MemoryRepos` value implements every repository port over shared
//! locked maps, with the same semantics as the PostgreSQL adapters:
//! compare-and-swap claims, transactional cancel/finalize/rollback under a
//! single lock, and uniqueness conflicts. `MemoryJobQueue` provides the
//! list-plus-delayed-bucket discipline of the Redis queue. Used by the
//! application test suites and by single-process development mode.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atelier_core::event::RunEvent;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::run::{Run, Step, StepStatus};
use atelier_core::site::{Page, Site};
use atelier_core::version::{BuildJob, BuildJobStatus, SiteVersion, VersionStatus};
use atelier_core::{
    BuildJobId, DomainError, PageId, Result, RunId, SiteId, SiteVersionId, Tenant, TenantId,
    User, UserId, WorkflowId,
};
use atelier_core::workflow::Workflow;
use atelier_ports::{
    BuildJobRepository, EventRepository, JobQueue, PageRepository, PushEvent, RunRepository,
    SiteRepository, SiteVersionRepository, TenantRepository, UserRepository, WorkflowRepository,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Paginated<T> {
    let total = items.len() as u64;
    let data = items
        .iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .cloned()
        .collect();
    Paginated::new(data, total, page)
}

#[derive(Default)]
struct State {
    tenants: HashMap<TenantId, Tenant>,
    users: HashMap<UserId, User>,
    workflows: HashMap<WorkflowId, Workflow>,
    runs: HashMap<RunId, Run>,
    steps: HashMap<(RunId, String), Step>,
    events: Vec<RunEvent>,
    sites: HashMap<SiteId, Site>,
    pages: HashMap<PageId, Page>,
    versions: HashMap<SiteVersionId, SiteVersion>,
    build_jobs: HashMap<BuildJobId, BuildJob>,
}

#[derive(Default, Clone)]
pub struct MemoryRepos {
    state: Arc<RwLock<State>>,
}

impl MemoryRepos {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantRepository for MemoryRepos {
    async fn create(&self, tenant: &Tenant) -> Result<()> {
        self.state
            .write()
            .await
            .tenants
            .insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn get(&self, id: TenantId) -> Result<Option<Tenant>> {
        Ok(self.state.read().await.tenants.get(&id).cloned())
    }
}

#[async_trait]
impl UserRepository for MemoryRepos {
    async fn create(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(DomainError::Conflict("email already registered".to_string()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn get(&self, tenant_id: TenantId, id: UserId) -> Result<Option<User>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .get(&id)
            .filter(|u| u.tenant_id == tenant_id)
            .cloned())
    }
}

#[async_trait]
impl WorkflowRepository for MemoryRepos {
    async fn create(&self, workflow: &Workflow) -> Result<()> {
        self.state
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: WorkflowId) -> Result<Option<Workflow>> {
        Ok(self
            .state
            .read()
            .await
            .workflows
            .get(&id)
            .filter(|w| w.tenant_id == tenant_id)
            .cloned())
    }

    async fn list(&self, tenant_id: TenantId, page: PageRequest) -> Result<Paginated<Workflow>> {
        let state = self.state.read().await;
        let mut workflows: Vec<Workflow> = state
            .workflows
            .values()
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(&workflows, page))
    }

    async fn update(&self, workflow: &Workflow) -> Result<()> {
        let mut state = self.state.write().await;
        match state.workflows.get(&workflow.id) {
            Some(existing) if existing.tenant_id == workflow.tenant_id => {
                state.workflows.insert(workflow.id, workflow.clone());
                Ok(())
            }
            _ => Err(DomainError::not_found(format!("workflow {}", workflow.id))),
        }
    }
}

#[async_trait]
impl RunRepository for MemoryRepos {
    async fn create_run_with_steps(&self, run: &Run, steps: &[Step]) -> Result<()> {
        let mut state = self.state.write().await;
        state.runs.insert(run.id, run.clone());
        for step in steps {
            state
                .steps
                .insert((run.id, step.step_key.clone()), step.clone());
        }
        Ok(())
    }

    async fn get_run(&self, tenant_id: TenantId, id: RunId) -> Result<Option<Run>> {
        Ok(self
            .state
            .read()
            .await
            .runs
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_run(&self, run: &Run) -> Result<()> {
        self.state.write().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn list_runs(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        page: PageRequest,
    ) -> Result<Paginated<Run>> {
        let state = self.state.read().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(paginate(&runs, page))
    }

    async fn get_step(&self, run_id: RunId, step_key: &str) -> Result<Option<Step>> {
        Ok(self
            .state
            .read()
            .await
            .steps
            .get(&(run_id, step_key.to_string()))
            .cloned())
    }

    async fn list_steps(&self, run_id: RunId) -> Result<Vec<Step>> {
        let state = self.state.read().await;
        let mut steps: Vec<Step> = state
            .steps
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.step_key.cmp(&b.step_key));
        Ok(steps)
    }

    async fn update_step(&self, step: &Step) -> Result<()> {
        self.state
            .write()
            .await
            .steps
            .insert((step.run_id, step.step_key.clone()), step.clone());
        Ok(())
    }

    async fn claim_step(
        &self,
        run_id: RunId,
        step_key: &str,
        retry_count: u32,
    ) -> Result<Option<Step>> {
        let mut state = self.state.write().await;
        let Some(step) = state.steps.get_mut(&(run_id, step_key.to_string())) else {
            return Ok(None);
        };
        if step.status != StepStatus::Pending || step.retry_count != retry_count {
            return Ok(None);
        }
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        Ok(Some(step.clone()))
    }

    async fn cancel_run(&self, tenant_id: TenantId, id: RunId) -> Result<Run> {
        let mut state = self.state.write().await;
        let cancelled = {
            let Some(run) = state.runs.get_mut(&id).filter(|r| r.tenant_id == tenant_id) else {
                return Err(DomainError::not_found(format!("run {id}")));
            };
            run.cancel()?;
            run.clone()
        };
        for step in state.steps.values_mut().filter(|s| s.run_id == id) {
            if matches!(step.status, StepStatus::Pending | StepStatus::Running) {
                step.status = StepStatus::Skipped;
                step.completed_at = Some(Utc::now());
            }
        }
        Ok(cancelled)
    }
}

#[async_trait]
impl EventRepository for MemoryRepos {
    async fn append(&self, event: &RunEvent) -> Result<()> {
        self.state.write().await.events.push(event.clone());
        Ok(())
    }

    async fn list(
        &self,
        run_id: RunId,
        since: Option<DateTime<Utc>>,
        page: PageRequest,
    ) -> Result<Paginated<RunEvent>> {
        let state = self.state.read().await;
        let mut events: Vec<RunEvent> = state
            .events
            .iter()
            .filter(|e| e.run_id == run_id)
            .filter(|e| since.map(|s| e.timestamp > s).unwrap_or(true))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(paginate(&events, page))
    }
}

#[async_trait]
impl SiteRepository for MemoryRepos {
    async fn create(&self, site: &Site) -> Result<()> {
        let mut state = self.state.write().await;
        if state.sites.values().any(|s| s.subdomain == site.subdomain) {
            return Err(DomainError::Conflict("subdomain already taken".to_string()));
        }
        if state
            .sites
            .values()
            .any(|s| s.tenant_id == site.tenant_id && s.slug == site.slug)
        {
            return Err(DomainError::Conflict("slug already taken".to_string()));
        }
        state.sites.insert(site.id, site.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: SiteId) -> Result<Option<Site>> {
        Ok(self
            .state
            .read()
            .await
            .sites
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_by_subdomain(&self, subdomain: &str) -> Result<Option<Site>> {
        Ok(self
            .state
            .read()
            .await
            .sites
            .values()
            .find(|s| s.subdomain == subdomain)
            .cloned())
    }

    async fn list(&self, tenant_id: TenantId, page: PageRequest) -> Result<Paginated<Site>> {
        let state = self.state.read().await;
        let mut sites: Vec<Site> = state
            .sites
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        sites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(&sites, page))
    }

    async fn update(&self, site: &Site) -> Result<()> {
        self.state.write().await.sites.insert(site.id, site.clone());
        Ok(())
    }

    async fn delete(&self, tenant_id: TenantId, id: SiteId) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(site) = state.sites.get(&id) else {
            return Err(DomainError::not_found(format!("site {id}")));
        };
        if site.tenant_id != tenant_id {
            return Err(DomainError::not_found(format!("site {id}")));
        }
        state.sites.remove(&id);
        state.pages.retain(|_, p| p.site_id != id);
        let version_ids: Vec<SiteVersionId> = state
            .versions
            .values()
            .filter(|v| v.site_id == id)
            .map(|v| v.id)
            .collect();
        state.versions.retain(|_, v| v.site_id != id);
        state
            .build_jobs
            .retain(|_, j| !version_ids.contains(&j.site_version_id));
        Ok(())
    }
}

#[async_trait]
impl PageRepository for MemoryRepos {
    async fn create(&self, page: &Page) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .pages
            .values()
            .any(|p| p.site_id == page.site_id && p.path == page.path)
        {
            return Err(DomainError::Conflict("page path already exists".to_string()));
        }
        state.pages.insert(page.id, page.clone());
        Ok(())
    }

    async fn get(&self, site_id: SiteId, id: PageId) -> Result<Option<Page>> {
        Ok(self
            .state
            .read()
            .await
            .pages
            .get(&id)
            .filter(|p| p.site_id == site_id)
            .cloned())
    }

    async fn list(&self, site_id: SiteId, page: PageRequest) -> Result<Paginated<Page>> {
        let state = self.state.read().await;
        let mut pages: Vec<Page> = state
            .pages
            .values()
            .filter(|p| p.site_id == site_id)
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.path.cmp(&b.path)));
        Ok(paginate(&pages, page))
    }

    async fn list_published(&self, site_id: SiteId) -> Result<Vec<Page>> {
        let state = self.state.read().await;
        let mut pages: Vec<Page> = state
            .pages
            .values()
            .filter(|p| p.site_id == site_id && p.is_published)
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.path.cmp(&b.path)));
        Ok(pages)
    }

    async fn update(&self, page: &Page) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .pages
            .values()
            .any(|p| p.site_id == page.site_id && p.path == page.path && p.id != page.id)
        {
            return Err(DomainError::Conflict("page path already exists".to_string()));
        }
        state.pages.insert(page.id, page.clone());
        Ok(())
    }

    async fn delete(&self, site_id: SiteId, id: PageId) -> Result<()> {
        let mut state = self.state.write().await;
        match state.pages.get(&id) {
            Some(page) if page.site_id == site_id => {
                state.pages.remove(&id);
                Ok(())
            }
            _ => Err(DomainError::not_found(format!("page {id}"))),
        }
    }
}

#[async_trait]
impl SiteVersionRepository for MemoryRepos {
    async fn next_version_number(&self, site_id: SiteId) -> Result<i32> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .values()
            .filter(|v| v.site_id == site_id)
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1)
    }

    async fn create_with_job(&self, version: &SiteVersion, job: &BuildJob) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .versions
            .values()
            .any(|v| v.site_id == version.site_id && v.version == version.version)
        {
            return Err(DomainError::Conflict("version number taken".to_string()));
        }
        state.versions.insert(version.id, version.clone());
        state.build_jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, site_id: SiteId, id: SiteVersionId) -> Result<Option<SiteVersion>> {
        Ok(self
            .state
            .read()
            .await
            .versions
            .get(&id)
            .filter(|v| v.site_id == site_id)
            .cloned())
    }

    async fn list(&self, site_id: SiteId, page: PageRequest) -> Result<Paginated<SiteVersion>> {
        let state = self.state.read().await;
        let mut versions: Vec<SiteVersion> = state
            .versions
            .values()
            .filter(|v| v.site_id == site_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(paginate(&versions, page))
    }

    async fn finalize_build(&self, version: &SiteVersion, job: &BuildJob) -> Result<()> {
        let mut state = self.state.write().await;
        let prior = state
            .sites
            .get(&version.site_id)
            .and_then(|s| s.active_version_id);
        state.versions.insert(version.id, version.clone());
        if let Some(prior) = prior {
            if prior != version.id {
                if let Some(prior_version) = state.versions.get_mut(&prior) {
                    if prior_version.status == VersionStatus::Ready {
                        prior_version.status = VersionStatus::Superseded;
                    }
                }
            }
        }
        if let Some(site) = state.sites.get_mut(&version.site_id) {
            site.active_version_id = Some(version.id);
            site.updated_at = Utc::now();
        }
        state.build_jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn fail_build(&self, version: &SiteVersion, job: &BuildJob) -> Result<()> {
        let mut state = self.state.write().await;
        state.versions.insert(version.id, version.clone());
        state.build_jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn rollback(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        target: SiteVersionId,
    ) -> Result<SiteVersion> {
        let mut state = self.state.write().await;
        let Some(site) = state.sites.get(&site_id).filter(|s| s.tenant_id == tenant_id) else {
            return Err(DomainError::not_found(format!("site {site_id}")));
        };
        let active = site.active_version_id;

        let Some(version) = state.versions.get(&target).filter(|v| v.site_id == site_id) else {
            return Err(DomainError::not_found(format!("site version {target}")));
        };
        let mut version = version.clone();
        match version.status {
            VersionStatus::Ready => {}
            VersionStatus::Superseded => version.promote()?,
            other => {
                return Err(DomainError::validation_fields(
                    format!("cannot roll back to a {other} version"),
                    vec!["versionId".to_string()],
                ));
            }
        }
        state.versions.insert(version.id, version.clone());

        if let Some(active) = active {
            if active != target {
                if let Some(active_version) = state.versions.get_mut(&active) {
                    if active_version.status == VersionStatus::Ready {
                        active_version.status = VersionStatus::Superseded;
                    }
                }
            }
        }
        if let Some(site) = state.sites.get_mut(&site_id) {
            site.active_version_id = Some(target);
            site.updated_at = Utc::now();
        }
        Ok(version)
    }
}

#[async_trait]
impl BuildJobRepository for MemoryRepos {
    async fn get(&self, id: BuildJobId) -> Result<Option<BuildJob>> {
        Ok(self.state.read().await.build_jobs.get(&id).cloned())
    }

    async fn claim(&self, id: BuildJobId, worker_id: &str) -> Result<Option<BuildJob>> {
        let mut state = self.state.write().await;
        let Some(job) = state.build_jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != BuildJobStatus::Queued {
            return Ok(None);
        }
        job.status = BuildJobStatus::Processing;
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn update(&self, job: &BuildJob) -> Result<()> {
        self.state
            .write()
            .await
            .build_jobs
            .insert(job.id, job.clone());
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    ready: HashMap<String, VecDeque<Value>>,
    delayed: Vec<(Instant, String, Value)>,
}

/// In-memory queue with the same list-plus-delayed-bucket discipline as
/// the Redis adapter.
#[derive(Default, Clone)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn promote_due(&self) {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut remaining = Vec::new();
        for (due, queue, payload) in state.delayed.drain(..) {
            if due <= now {
                state.ready.entry(queue).or_default().push_back(payload);
            } else {
                remaining.push((due, queue, payload));
            }
        }
        state.delayed = remaining;
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, queue: &str, payload: Value) -> Result<()> {
        self.state
            .lock()
            .await
            .ready
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn enqueue_delayed(&self, queue: &str, payload: Value, delay: Duration) -> Result<()> {
        self.state
            .lock()
            .await
            .delayed
            .push((Instant::now() + delay, queue.to_string(), payload));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Value>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.promote_due().await;
            {
                let mut state = self.state.lock().await;
                if let Some(payload) = state.ready.get_mut(queue).and_then(|q| q.pop_front()) {
                    return Ok(Some(payload));
                }
                // Wake for the earliest delayed job even with no notify.
                drop(state);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let next_due = {
                let state = self.state.lock().await;
                state
                    .delayed
                    .iter()
                    .filter(|(_, q, _)| q == queue)
                    .map(|(due, _, _)| *due)
                    .min()
            };
            let wake_at = next_due.map(|d| d.min(deadline)).unwrap_or(deadline);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Event publisher that records everything it sees; the test double for
/// the push bus.
#[derive(Default, Clone)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<PushEvent>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<PushEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl atelier_ports::EventPublisher for RecordingPublisher {
    async fn publish(&self, event: PushEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn queue_delivers_in_order() {
        let queue = MemoryJobQueue::new();
        queue.enqueue("q", json!(1)).await.unwrap();
        queue.enqueue("q", json!(2)).await.unwrap();
        assert_eq!(
            queue.pop("q", Duration::from_millis(50)).await.unwrap(),
            Some(json!(1))
        );
        assert_eq!(
            queue.pop("q", Duration::from_millis(50)).await.unwrap(),
            Some(json!(2))
        );
        assert_eq!(queue.pop("q", Duration::from_millis(50)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delayed_jobs_surface_after_their_delay() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue_delayed("q", json!("later"), Duration::from_millis(80))
            .await
            .unwrap();
        assert_eq!(queue.pop("q", Duration::from_millis(10)).await.unwrap(), None);
        assert_eq!(
            queue.pop("q", Duration::from_millis(500)).await.unwrap(),
            Some(json!("later"))
        );
    }

    #[tokio::test]
    async fn claim_step_is_single_winner() {
        use atelier_core::run::Run;
        use atelier_core::workflow::NodeType;

        let repos = MemoryRepos::new();
        let run = Run::new(TenantId::new(), WorkflowId::new(), json!({}));
        let step = Step::new(run.id, "a", NodeType::Transform);
        repos
            .create_run_with_steps(&run, std::slice::from_ref(&step))
            .await
            .unwrap();

        let first = repos.claim_step(run.id, "a", 0).await.unwrap();
        assert!(first.is_some());
        let second = repos.claim_step(run.id, "a", 0).await.unwrap();
        assert!(second.is_none());
    }
}
