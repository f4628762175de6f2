//! PostgreSQL adapter
//!
//! Connection pool setup, schema initialization, error mapping and the
//! database health probe. Each repository owns its SQL; multi-step
//! transitions run inside a single transaction so the relational store
//! stays the system of record.

use std::time::Instant;

use async_trait::async_trait;
use atelier_core::health::ComponentHealth;
use atelier_core::{DomainError, Result};
use atelier_ports::HealthProbe;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

pub mod run_repository;
pub mod site_repository;
pub mod tenant_repository;
pub mod version_repository;
pub mod workflow_repository;

pub use run_repository::{PgEventRepository, PgRunRepository};
pub use site_repository::{PgPageRepository, PgSiteRepository};
pub use tenant_repository::{PgTenantRepository, PgUserRepository};
pub use version_repository::{PgBuildJobRepository, PgSiteVersionRepository};
pub use workflow_repository::PgWorkflowRepository;

/// Connect with bounded pool size and a short acquire timeout.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("failed to connect to postgres: {e}")))
}

/// Create every table and index. Idempotent; runs at startup.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    info!("initializing database schema");
    tenant_repository::init_schema(pool).await?;
    workflow_repository::init_schema(pool).await?;
    run_repository::init_schema(pool).await?;
    site_repository::init_schema(pool).await?;
    version_repository::init_schema(pool).await?;
    Ok(())
}

/// Map an sqlx error to the domain taxonomy. Uniqueness violations become
/// `Conflict`; everything else is infrastructure.
pub(crate) fn map_db_err(context: &str, e: sqlx::Error) -> DomainError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return DomainError::Conflict(context.to_string());
        }
    }
    DomainError::Infrastructure(format!("{context}: {e}"))
}

pub(crate) fn map_json_err(context: &str, e: serde_json::Error) -> DomainError {
    DomainError::Infrastructure(format!("{context}: {e}"))
}

/// `SELECT 1` probe reporting round-trip latency.
pub struct PgHealthProbe {
    pool: PgPool,
}

impl PgHealthProbe {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for PgHealthProbe {
    fn component(&self) -> &str {
        "database"
    }

    async fn check(&self) -> ComponentHealth {
        let started = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => ComponentHealth::healthy("database", started.elapsed().as_millis() as u64),
            Err(e) => ComponentHealth::unhealthy("database", e.to_string()),
        }
    }
}
