//! PostgreSQL site version and build job repositories
//!
//! Activation and rollback hold one transaction with the site row locked,
//! which makes the `activeVersionId` flip linearizable per site.

use async_trait::async_trait;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::version::{BuildJob, BuildJobStatus, SiteVersion, VersionStatus};
use atelier_core::{BuildJobId, DomainError, Result, SiteId, SiteVersionId, TenantId};
use atelier_ports::{BuildJobRepository, SiteVersionRepository};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::map_db_err;

pub(crate) async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS site_versions (
            id UUID PRIMARY KEY,
            site_id UUID NOT NULL,
            version INTEGER NOT NULL,
            artifact_prefix TEXT NOT NULL,
            status TEXT NOT NULL,
            page_count INTEGER NOT NULL DEFAULT 0,
            asset_size BIGINT NOT NULL DEFAULT 0,
            manifest_hash TEXT NULL,
            build_duration_ms BIGINT NULL,
            published_at TIMESTAMPTZ NULL,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (site_id, version)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create site_versions table", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_jobs (
            id UUID PRIMARY KEY,
            site_version_id UUID NOT NULL REFERENCES site_versions(id),
            tenant_id UUID NOT NULL,
            status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            worker_id TEXT NULL,
            error TEXT NULL,
            started_at TIMESTAMPTZ NULL,
            completed_at TIMESTAMPTZ NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create build_jobs table", e))?;

    Ok(())
}

fn row_to_version(row: &PgRow) -> Result<SiteVersion> {
    Ok(SiteVersion {
        id: SiteVersionId::from_uuid(row.get("id")),
        site_id: SiteId::from_uuid(row.get("site_id")),
        version: row.get("version"),
        artifact_prefix: row.get("artifact_prefix"),
        status: VersionStatus::parse(row.get("status"))?,
        page_count: row.get("page_count"),
        asset_size: row.get("asset_size"),
        manifest_hash: row.get("manifest_hash"),
        build_duration_ms: row.get("build_duration_ms"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_job(row: &PgRow) -> Result<BuildJob> {
    Ok(BuildJob {
        id: BuildJobId::from_uuid(row.get("id")),
        site_version_id: SiteVersionId::from_uuid(row.get("site_version_id")),
        tenant_id: TenantId::from_uuid(row.get("tenant_id")),
        status: BuildJobStatus::parse(row.get("status"))?,
        retry_count: row.get::<i32, _>("retry_count") as u32,
        worker_id: row.get("worker_id"),
        error: row.get("error"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
    })
}

async fn update_version_tx(
    tx: &mut Transaction<'_, Postgres>,
    version: &SiteVersion,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE site_versions
        SET status = $2, page_count = $3, asset_size = $4, manifest_hash = $5,
            build_duration_ms = $6, published_at = $7
        WHERE id = $1
        "#,
    )
    .bind(version.id.as_uuid())
    .bind(version.status.as_str())
    .bind(version.page_count)
    .bind(version.asset_size)
    .bind(&version.manifest_hash)
    .bind(version.build_duration_ms)
    .bind(version.published_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_db_err("update site version", e))?;
    Ok(())
}

async fn update_job_tx(tx: &mut Transaction<'_, Postgres>, job: &BuildJob) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE build_jobs
        SET status = $2, retry_count = $3, worker_id = $4, error = $5,
            started_at = $6, completed_at = $7
        WHERE id = $1
        "#,
    )
    .bind(job.id.as_uuid())
    .bind(job.status.as_str())
    .bind(job.retry_count as i32)
    .bind(&job.worker_id)
    .bind(&job.error)
    .bind(job.started_at)
    .bind(job.completed_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_db_err("update build job", e))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgSiteVersionRepository {
    pool: PgPool,
}

impl PgSiteVersionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteVersionRepository for PgSiteVersionRepository {
    async fn next_version_number(&self, site_id: SiteId) -> Result<i32> {
        let max: Option<i32> =
            sqlx::query_scalar("SELECT MAX(version) FROM site_versions WHERE site_id = $1")
                .bind(site_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_db_err("max site version", e))?;
        Ok(max.unwrap_or(0) + 1)
    }

    async fn create_with_job(&self, version: &SiteVersion, job: &BuildJob) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin create version", e))?;

        sqlx::query(
            r#"
            INSERT INTO site_versions
                (id, site_id, version, artifact_prefix, status, page_count, asset_size,
                 manifest_hash, build_duration_ms, published_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(version.id.as_uuid())
        .bind(version.site_id.as_uuid())
        .bind(version.version)
        .bind(&version.artifact_prefix)
        .bind(version.status.as_str())
        .bind(version.page_count)
        .bind(version.asset_size)
        .bind(&version.manifest_hash)
        .bind(version.build_duration_ms)
        .bind(version.published_at)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("insert site version", e))?;

        sqlx::query(
            r#"
            INSERT INTO build_jobs
                (id, site_version_id, tenant_id, status, retry_count, worker_id, error,
                 started_at, completed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.site_version_id.as_uuid())
        .bind(job.tenant_id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.retry_count as i32)
        .bind(&job.worker_id)
        .bind(&job.error)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("insert build job", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit create version", e))
    }

    async fn get(&self, site_id: SiteId, id: SiteVersionId) -> Result<Option<SiteVersion>> {
        let row = sqlx::query("SELECT * FROM site_versions WHERE site_id = $1 AND id = $2")
            .bind(site_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get site version", e))?;
        row.as_ref().map(row_to_version).transpose()
    }

    async fn list(&self, site_id: SiteId, page: PageRequest) -> Result<Paginated<SiteVersion>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM site_versions WHERE site_id = $1")
                .bind(site_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_db_err("count site versions", e))?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM site_versions
            WHERE site_id = $1
            ORDER BY version DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(site_id.as_uuid())
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list site versions", e))?;

        let versions = rows.iter().map(row_to_version).collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(versions, total as u64, page))
    }

    async fn finalize_build(&self, version: &SiteVersion, job: &BuildJob) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin finalize build", e))?;

        // Lock the site row: the pointer flip is linearizable per site.
        let prior: Option<uuid::Uuid> = sqlx::query_scalar(
            "SELECT active_version_id FROM sites WHERE id = $1 FOR UPDATE",
        )
        .bind(version.site_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_err("lock site for activation", e))?;

        update_version_tx(&mut tx, version).await?;

        if let Some(prior) = prior {
            if prior != version.id.as_uuid() {
                sqlx::query(
                    "UPDATE site_versions SET status = 'SUPERSEDED' \
                     WHERE id = $1 AND status = 'READY'",
                )
                .bind(prior)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_db_err("supersede prior version", e))?;
            }
        }

        sqlx::query("UPDATE sites SET active_version_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(version.site_id.as_uuid())
            .bind(version.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("flip active version", e))?;

        update_job_tx(&mut tx, job).await?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit finalize build", e))
    }

    async fn fail_build(&self, version: &SiteVersion, job: &BuildJob) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin fail build", e))?;
        update_version_tx(&mut tx, version).await?;
        update_job_tx(&mut tx, job).await?;
        tx.commit()
            .await
            .map_err(|e| map_db_err("commit fail build", e))
    }

    async fn rollback(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        target: SiteVersionId,
    ) -> Result<SiteVersion> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin rollback", e))?;

        let site_row = sqlx::query(
            "SELECT active_version_id FROM sites WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id.as_uuid())
        .bind(site_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_db_err("lock site for rollback", e))?;

        let Some(site_row) = site_row else {
            return Err(DomainError::not_found(format!("site {site_id}")));
        };
        let active: Option<uuid::Uuid> = site_row.get("active_version_id");

        let row = sqlx::query("SELECT * FROM site_versions WHERE site_id = $1 AND id = $2")
            .bind(site_id.as_uuid())
            .bind(target.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_err("get rollback target", e))?;

        let Some(row) = row else {
            return Err(DomainError::not_found(format!("site version {target}")));
        };
        let mut version = row_to_version(&row)?;

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

        sqlx::query("UPDATE site_versions SET status = $2 WHERE id = $1")
            .bind(version.id.as_uuid())
            .bind(version.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("promote rollback target", e))?;

        if let Some(active) = active {
            if active != target.as_uuid() {
                sqlx::query(
                    "UPDATE site_versions SET status = 'SUPERSEDED' \
                     WHERE id = $1 AND status = 'READY'",
                )
                .bind(active)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_db_err("supersede active version", e))?;
            }
        }

        sqlx::query("UPDATE sites SET active_version_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(site_id.as_uuid())
            .bind(target.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("flip active version", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit rollback", e))?;
        Ok(version)
    }
}

#[derive(Debug, Clone)]
pub struct PgBuildJobRepository {
    pool: PgPool,
}

impl PgBuildJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildJobRepository for PgBuildJobRepository {
    async fn get(&self, id: BuildJobId) -> Result<Option<BuildJob>> {
        let row = sqlx::query("SELECT * FROM build_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get build job", e))?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn claim(&self, id: BuildJobId, worker_id: &str) -> Result<Option<BuildJob>> {
        let row = sqlx::query(
            r#"
            UPDATE build_jobs
            SET status = 'PROCESSING', worker_id = $2, started_at = NOW()
            WHERE id = $1 AND status = 'QUEUED'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("claim build job", e))?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn update(&self, job: &BuildJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE build_jobs
            SET status = $2, retry_count = $3, worker_id = $4, error = $5,
                started_at = $6, completed_at = $7
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.retry_count as i32)
        .bind(&job.worker_id)
        .bind(&job.error)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update build job", e))?;
        Ok(())
    }
}
