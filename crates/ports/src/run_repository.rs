//! Run, step and event repository ports

use async_trait::async_trait;
use atelier_core::event::RunEvent;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::run::{Run, Step};
use atelier_core::{Result, RunId, TenantId, WorkflowId};
use chrono::{DateTime, Utc};

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Persist a run and its bulk-created step records atomically.
    async fn create_run_with_steps(&self, run: &Run, steps: &[Step]) -> Result<()>;

    async fn get_run(&self, tenant_id: TenantId, id: RunId) -> Result<Option<Run>>;

    async fn update_run(&self, run: &Run) -> Result<()>;

    async fn list_runs(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        page: PageRequest,
    ) -> Result<Paginated<Run>>;

    async fn get_step(&self, run_id: RunId, step_key: &str) -> Result<Option<Step>>;

    async fn list_steps(&self, run_id: RunId) -> Result<Vec<Step>>;

    async fn update_step(&self, step: &Step) -> Result<()>;

    /// Compare-and-swap claim: PENDING → RUNNING iff the retry counter
    /// still matches. Returns the claimed step, or `None` when another
    /// delivery of the same job already moved it. This is what turns the
    /// queue's at-least-once delivery into effectively-once persistence.
    async fn claim_step(
        &self,
        run_id: RunId,
        step_key: &str,
        retry_count: u32,
    ) -> Result<Option<Step>>;

    /// Cancel in one transaction: run → CANCELLED, every PENDING/RUNNING
    /// step → SKIPPED. Fails with an invalid-transition error when the run
    /// is already terminal.
    async fn cancel_run(&self, tenant_id: TenantId, id: RunId) -> Result<Run>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: &RunEvent) -> Result<()>;

    async fn list(
        &self,
        run_id: RunId,
        since: Option<DateTime<Utc>>,
        page: PageRequest,
    ) -> Result<Paginated<RunEvent>>;
}
