//! PostgreSQL workflow repository

use async_trait::async_trait;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::workflow::{Workflow, WorkflowDefinition};
use atelier_core::{Result, TenantId, WorkflowId};
use atelier_ports::WorkflowRepository;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{map_db_err, map_json_err};

pub(crate) async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflows (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL,
            name TEXT NOT NULL,
            version INTEGER NOT NULL,
            definition JSONB NOT NULL,
            is_active BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create workflows table", e))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_tenant ON workflows(tenant_id)")
        .execute(pool)
        .await
        .map_err(|e| map_db_err("create workflows index", e))?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgWorkflowRepository {
    pool: PgPool,
}

impl PgWorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_workflow(row: &PgRow) -> Result<Workflow> {
    let definition: WorkflowDefinition = serde_json::from_value(row.get("definition"))
        .map_err(|e| map_json_err("deserialize workflow definition", e))?;
    Ok(Workflow {
        id: WorkflowId::from_uuid(row.get("id")),
        tenant_id: TenantId::from_uuid(row.get("tenant_id")),
        name: row.get("name"),
        version: row.get("version"),
        definition,
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn create(&self, workflow: &Workflow) -> Result<()> {
        let definition = serde_json::to_value(&workflow.definition)
            .map_err(|e| map_json_err("serialize workflow definition", e))?;
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, tenant_id, name, version, definition, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(workflow.id.as_uuid())
        .bind(workflow.tenant_id.as_uuid())
        .bind(&workflow.name)
        .bind(workflow.version)
        .bind(definition)
        .bind(workflow.is_active)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("insert workflow", e))?;
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: WorkflowId) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get workflow", e))?;
        row.as_ref().map(row_to_workflow).transpose()
    }

    async fn list(
        &self,
        tenant_id: TenantId,
        page: PageRequest,
    ) -> Result<Paginated<Workflow>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflows WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_err("count workflows", e))?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM workflows
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list workflows", e))?;

        let workflows = rows
            .iter()
            .map(row_to_workflow)
            .collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(workflows, total as u64, page))
    }

    async fn update(&self, workflow: &Workflow) -> Result<()> {
        let definition = serde_json::to_value(&workflow.definition)
            .map_err(|e| map_json_err("serialize workflow definition", e))?;
        sqlx::query(
            r#"
            UPDATE workflows
            SET name = $3, version = $4, definition = $5, is_active = $6, updated_at = $7
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(workflow.tenant_id.as_uuid())
        .bind(workflow.id.as_uuid())
        .bind(&workflow.name)
        .bind(workflow.version)
        .bind(definition)
        .bind(workflow.is_active)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update workflow", e))?;
        Ok(())
    }
}
