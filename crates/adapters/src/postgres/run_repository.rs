//! PostgreSQL run, step and event repositories

use async_trait::async_trait;
use atelier_core::event::RunEvent;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::run::{Run, RunStatus, Step, StepStatus};
use atelier_core::workflow::NodeType;
use atelier_core::{DomainError, EventId, Result, RunId, StepId, TenantId, WorkflowId};
use atelier_ports::{EventRepository, RunRepository};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::map_db_err;

pub(crate) async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL,
            workflow_id UUID NOT NULL,
            status TEXT NOT NULL,
            input JSONB NOT NULL,
            output JSONB NULL,
            error TEXT NULL,
            current_step_key TEXT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create runs table", e))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_tenant_workflow ON runs(tenant_id, workflow_id)",
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create runs index", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS steps (
            id UUID PRIMARY KEY,
            run_id UUID NOT NULL REFERENCES runs(id),
            step_key TEXT NOT NULL,
            node_type TEXT NOT NULL,
            status TEXT NOT NULL,
            input JSONB NULL,
            output JSONB NULL,
            error TEXT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            scheduled_at TIMESTAMPTZ NULL,
            started_at TIMESTAMPTZ NULL,
            completed_at TIMESTAMPTZ NULL,
            UNIQUE (run_id, step_key)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create steps table", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_events (
            id UUID PRIMARY KEY,
            run_id UUID NOT NULL,
            step_id UUID NULL,
            step_key TEXT NULL,
            event_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create run_events table", e))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_run_events_run_ts ON run_events(run_id, timestamp)",
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create run_events index", e))?;

    Ok(())
}

fn row_to_run(row: &PgRow) -> Result<Run> {
    Ok(Run {
        id: RunId::from_uuid(row.get("id")),
        tenant_id: TenantId::from_uuid(row.get("tenant_id")),
        workflow_id: WorkflowId::from_uuid(row.get("workflow_id")),
        status: RunStatus::parse(row.get("status"))?,
        input: row.get("input"),
        output: row.get("output"),
        error: row.get("error"),
        current_step_key: row.get("current_step_key"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn row_to_step(row: &PgRow) -> Result<Step> {
    Ok(Step {
        id: StepId::from_uuid(row.get("id")),
        run_id: RunId::from_uuid(row.get("run_id")),
        step_key: row.get("step_key"),
        node_type: NodeType::parse(row.get("node_type"))?,
        status: StepStatus::parse(row.get("status"))?,
        input: row.get("input"),
        output: row.get("output"),
        error: row.get("error"),
        retry_count: row.get::<i32, _>("retry_count") as u32,
        scheduled_at: row.get("scheduled_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

#[derive(Debug, Clone)]
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn create_run_with_steps(&self, run: &Run, steps: &[Step]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin create run", e))?;

        sqlx::query(
            r#"
            INSERT INTO runs
                (id, tenant_id, workflow_id, status, input, output, error,
                 current_step_key, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.tenant_id.as_uuid())
        .bind(run.workflow_id.as_uuid())
        .bind(run.status.as_str())
        .bind(&run.input)
        .bind(&run.output)
        .bind(&run.error)
        .bind(&run.current_step_key)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("insert run", e))?;

        for step in steps {
            sqlx::query(
                r#"
                INSERT INTO steps
                    (id, run_id, step_key, node_type, status, input, output, error,
                     retry_count, scheduled_at, started_at, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(step.id.as_uuid())
            .bind(step.run_id.as_uuid())
            .bind(&step.step_key)
            .bind(step.node_type.as_str())
            .bind(step.status.as_str())
            .bind(&step.input)
            .bind(&step.output)
            .bind(&step.error)
            .bind(step.retry_count as i32)
            .bind(step.scheduled_at)
            .bind(step.started_at)
            .bind(step.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("insert step", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit create run", e))
    }

    async fn get_run(&self, tenant_id: TenantId, id: RunId) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get run", e))?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn update_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs
            SET status = $3, output = $4, error = $5, current_step_key = $6, completed_at = $7
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(run.tenant_id.as_uuid())
        .bind(run.id.as_uuid())
        .bind(run.status.as_str())
        .bind(&run.output)
        .bind(&run.error)
        .bind(&run.current_step_key)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update run", e))?;
        Ok(())
    }

    async fn list_runs(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        page: PageRequest,
    ) -> Result<Paginated<Run>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM runs WHERE tenant_id = $1 AND workflow_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(workflow_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("count runs", e))?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE tenant_id = $1 AND workflow_id = $2
            ORDER BY started_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(workflow_id.as_uuid())
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list runs", e))?;

        let runs = rows.iter().map(row_to_run).collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(runs, total as u64, page))
    }

    async fn get_step(&self, run_id: RunId, step_key: &str) -> Result<Option<Step>> {
        let row = sqlx::query("SELECT * FROM steps WHERE run_id = $1 AND step_key = $2")
            .bind(run_id.as_uuid())
            .bind(step_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get step", e))?;
        row.as_ref().map(row_to_step).transpose()
    }

    async fn list_steps(&self, run_id: RunId) -> Result<Vec<Step>> {
        let rows = sqlx::query("SELECT * FROM steps WHERE run_id = $1 ORDER BY step_key")
            .bind(run_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("list steps", e))?;
        rows.iter().map(row_to_step).collect()
    }

    async fn update_step(&self, step: &Step) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE steps
            SET status = $2, input = $3, output = $4, error = $5, retry_count = $6,
                scheduled_at = $7, started_at = $8, completed_at = $9
            WHERE id = $1
            "#,
        )
        .bind(step.id.as_uuid())
        .bind(step.status.as_str())
        .bind(&step.input)
        .bind(&step.output)
        .bind(&step.error)
        .bind(step.retry_count as i32)
        .bind(step.scheduled_at)
        .bind(step.started_at)
        .bind(step.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update step", e))?;
        Ok(())
    }

    async fn claim_step(
        &self,
        run_id: RunId,
        step_key: &str,
        retry_count: u32,
    ) -> Result<Option<Step>> {
        let row = sqlx::query(
            r#"
            UPDATE steps
            SET status = 'RUNNING', started_at = NOW()
            WHERE run_id = $1 AND step_key = $2 AND status = 'PENDING' AND retry_count = $3
            RETURNING *
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(step_key)
        .bind(retry_count as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("claim step", e))?;
        row.as_ref().map(row_to_step).transpose()
    }

    async fn cancel_run(&self, tenant_id: TenantId, id: RunId) -> Result<Run> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin cancel run", e))?;

        let row = sqlx::query("SELECT * FROM runs WHERE tenant_id = $1 AND id = $2 FOR UPDATE")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_err("lock run for cancel", e))?;

        let Some(row) = row else {
            return Err(DomainError::not_found(format!("run {id}")));
        };
        let mut run = row_to_run(&row)?;
        run.cancel()?;

        sqlx::query(
            "UPDATE runs SET status = $3, completed_at = $4 WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(id.as_uuid())
        .bind(run.status.as_str())
        .bind(run.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("cancel run", e))?;

        sqlx::query(
            r#"
            UPDATE steps
            SET status = 'SKIPPED', completed_at = NOW()
            WHERE run_id = $1 AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("skip steps on cancel", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit cancel run", e))?;
        Ok(run)
    }
}

#[derive(Debug, Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &PgRow) -> Result<RunEvent> {
    let event_type = serde_json::from_value(serde_json::Value::String(row.get("event_type")))
        .map_err(|e| {
            atelier_core::DomainError::Infrastructure(format!("bad event type in store: {e}"))
        })?;
    Ok(RunEvent {
        id: EventId::from_uuid(row.get("id")),
        run_id: RunId::from_uuid(row.get("run_id")),
        step_id: row
            .get::<Option<uuid::Uuid>, _>("step_id")
            .map(StepId::from_uuid),
        step_key: row.get("step_key"),
        event_type,
        payload: row.get("payload"),
        timestamp: row.get("timestamp"),
    })
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn append(&self, event: &RunEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_events (id, run_id, step_id, step_key, event_type, payload, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.run_id.as_uuid())
        .bind(event.step_id.map(|id| id.as_uuid()))
        .bind(&event.step_key)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("append event", e))?;
        Ok(())
    }

    async fn list(
        &self,
        run_id: RunId,
        since: Option<DateTime<Utc>>,
        page: PageRequest,
    ) -> Result<Paginated<RunEvent>> {
        let since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM run_events WHERE run_id = $1 AND timestamp > $2",
        )
        .bind(run_id.as_uuid())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("count events", e))?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM run_events
            WHERE run_id = $1 AND timestamp > $2
            ORDER BY timestamp ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(since)
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list events", e))?;

        let events = rows.iter().map(row_to_event).collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(events, total as u64, page))
    }
}
