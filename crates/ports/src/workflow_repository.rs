//! Workflow repository port

use async_trait::async_trait;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::workflow::Workflow;
use atelier_core::{Result, TenantId, WorkflowId};

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create(&self, workflow: &Workflow) -> Result<()>;

    async fn get(&self, tenant_id: TenantId, id: WorkflowId) -> Result<Option<Workflow>>;

    async fn list(
        &self,
        tenant_id: TenantId,
        page: PageRequest,
    ) -> Result<Paginated<Workflow>>;

    /// Persists the full aggregate, including the bumped version.
    async fn update(&self, workflow: &Workflow) -> Result<()>;
}
