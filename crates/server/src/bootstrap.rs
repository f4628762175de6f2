//! Server bootstrap
//!
//! Wires configuration into concrete adapters, builds both engines and
//! their worker pools, and hands the assembled context to the router and
//! the binary. In `test` mode everything runs on the in-memory adapters
//! so a single process can come up with no external stores.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atelier_adapters::config::{AppConfig, Environment};
use atelier_adapters::memory::{MemoryJobQueue, MemoryRepos};
use atelier_adapters::postgres::{
    self, PgBuildJobRepository, PgEventRepository, PgHealthProbe, PgPageRepository,
    PgRunRepository, PgSiteRepository, PgSiteVersionRepository, PgTenantRepository,
    PgUserRepository, PgWorkflowRepository,
};
use atelier_adapters::redis_queue::{RedisHealthProbe, RedisJobQueue};
use atelier_adapters::{
    FsObjectStore, HttpCompletion, HttpObjectStore, JwtTokenService, MockCompletion,
    ReqwestFetcher, Sha256PasswordHasher,
};
use atelier_application::builder::build_worker::BuildConfig;
use atelier_application::builder::{BuildEngine, BuildWorker, PublishService, SiteResolver};
use atelier_application::workflow::{EngineConfig, NodeExecutor, StepWorker, WorkflowEngine};
use atelier_application::{AuthService, PushBus};
use atelier_ports::{
    BuildJobRepository, Completion, EventRepository, HealthProbe, HttpFetch, JobQueue,
    ObjectStore, PageRepository, RunRepository, SiteRepository, SiteVersionRepository,
    TenantRepository, TokenService, UserRepository, WorkflowRepository,
};
use tracing::info;

const TOKEN_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Everything the router and the binary need, fully wired.
#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub tokens: Arc<dyn TokenService>,
    pub auth: Arc<AuthService>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub events: Arc<dyn EventRepository>,
    pub sites: Arc<dyn SiteRepository>,
    pub pages: Arc<dyn PageRepository>,
    pub versions: Arc<dyn SiteVersionRepository>,
    pub build_jobs: Arc<dyn BuildJobRepository>,
    pub queue: Arc<dyn JobQueue>,
    pub engine: Arc<WorkflowEngine>,
    pub publish: Arc<PublishService>,
    pub resolver: Arc<SiteResolver>,
    pub push_bus: Arc<PushBus>,
    pub probes: Arc<Vec<Arc<dyn HealthProbe>>>,
    pub step_worker: Arc<StepWorker>,
    pub build_engine: Arc<BuildEngine>,
    pub build_worker: Arc<BuildWorker>,
}

struct Stores {
    tenants: Arc<dyn TenantRepository>,
    users: Arc<dyn UserRepository>,
    workflows: Arc<dyn WorkflowRepository>,
    runs: Arc<dyn RunRepository>,
    events: Arc<dyn EventRepository>,
    sites: Arc<dyn SiteRepository>,
    pages: Arc<dyn PageRepository>,
    versions: Arc<dyn SiteVersionRepository>,
    build_jobs: Arc<dyn BuildJobRepository>,
    queue: Arc<dyn JobQueue>,
    probes: Vec<Arc<dyn HealthProbe>>,
}

async fn connect_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if config.env == Environment::Test {
        info!("test environment: using in-memory stores");
        let repos = Arc::new(MemoryRepos::new());
        let queue = Arc::new(MemoryJobQueue::new());
        return Ok(Stores {
            tenants: repos.clone(),
            users: repos.clone(),
            workflows: repos.clone(),
            runs: repos.clone(),
            events: repos.clone(),
            sites: repos.clone(),
            pages: repos.clone(),
            versions: repos.clone(),
            build_jobs: repos,
            queue,
            probes: Vec::new(),
        });
    }

    let pool = postgres::connect(&config.database_url, 20)
        .await
        .context("connecting to the relational store")?;
    postgres::init_schema(&pool)
        .await
        .context("initializing the database schema")?;

    let queue = RedisJobQueue::connect(&config.kv_url)
        .await
        .context("connecting to the key-value store")?;

    let probes: Vec<Arc<dyn HealthProbe>> = vec![
        Arc::new(PgHealthProbe::new(pool.clone())),
        Arc::new(RedisHealthProbe::new(queue.clone())),
    ];

    Ok(Stores {
        tenants: Arc::new(PgTenantRepository::new(pool.clone())),
        users: Arc::new(PgUserRepository::new(pool.clone())),
        workflows: Arc::new(PgWorkflowRepository::new(pool.clone())),
        runs: Arc::new(PgRunRepository::new(pool.clone())),
        events: Arc::new(PgEventRepository::new(pool.clone())),
        sites: Arc::new(PgSiteRepository::new(pool.clone())),
        pages: Arc::new(PgPageRepository::new(pool.clone())),
        versions: Arc::new(PgSiteVersionRepository::new(pool.clone())),
        build_jobs: Arc::new(PgBuildJobRepository::new(pool)),
        queue: Arc::new(queue),
        probes,
    })
}

/// Non-secret configuration exposed to workflow templates as `env.NAME`.
fn template_env(config: &AppConfig) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("ENV".to_string(), config.env.as_str().to_string());
    if let Some(cdn) = &config.cdn_base_url {
        env.insert("CDN_BASE_URL".to_string(), cdn.clone());
    }
    env
}

fn object_store(config: &AppConfig) -> Arc<dyn ObjectStore> {
    if config.object_store.endpoint.is_empty() {
        info!(root = %config.object_store.root, "artifact store: filesystem");
        Arc::new(FsObjectStore::new(config.object_store.root.clone()))
    } else {
        info!(
            endpoint = %config.object_store.endpoint,
            bucket = %config.object_store.bucket,
            "artifact store: http gateway"
        );
        Arc::new(HttpObjectStore::new(&config.object_store))
    }
}

pub async fn initialize(config: AppConfig) -> anyhow::Result<AppContext> {
    config.log_summary();
    crate::error::hide_internal_errors(config.env.is_production());

    let stores = connect_stores(&config).await?;
    let store = object_store(&config);

    let tokens: Arc<dyn TokenService> =
        Arc::new(JwtTokenService::new(&config.jwt_secret, TOKEN_TTL_SECONDS));
    let auth = Arc::new(AuthService::new(
        stores.tenants.clone(),
        stores.users.clone(),
        Arc::new(Sha256PasswordHasher),
        tokens.clone(),
    ));

    let completion: Arc<dyn Completion> = if config.completion_mock_mode() {
        info!("completion capability: deterministic mock");
        Arc::new(MockCompletion)
    } else {
        Arc::new(HttpCompletion::new(
            config.completion_api_url.clone(),
            config.completion_api_key.clone(),
        ))
    };
    let fetcher: Arc<dyn HttpFetch> =
        Arc::new(ReqwestFetcher::new(Duration::from_secs(30)).context("building http client")?);

    let push_bus = Arc::new(PushBus::new());

    let engine = Arc::new(WorkflowEngine::new(
        stores.workflows.clone(),
        stores.runs.clone(),
        stores.events.clone(),
        stores.queue.clone(),
        push_bus.clone(),
        NodeExecutor::new(completion, fetcher),
        EngineConfig {
            max_retries: config.worker.max_retries,
            retry_base_delay: config.worker.retry_base_delay,
            step_timeout: config.worker.step_timeout,
            env: template_env(&config),
        },
    ));

    let resolver = Arc::new(SiteResolver::new(
        stores.sites.clone(),
        stores.versions.clone(),
        store.clone(),
    ));
    let publish = Arc::new(PublishService::new(
        stores.sites.clone(),
        stores.pages.clone(),
        stores.versions.clone(),
        stores.queue.clone(),
        resolver.clone(),
    ));
    let build_engine = Arc::new(BuildEngine::new(
        stores.sites.clone(),
        stores.pages.clone(),
        stores.versions.clone(),
        stores.build_jobs.clone(),
        store,
        stores.queue.clone(),
        resolver.clone(),
        BuildConfig {
            max_retries: config.worker.max_retries,
            retry_base_delay: config.worker.retry_base_delay,
            ..BuildConfig::default()
        },
    ));

    let step_worker = Arc::new(StepWorker::new(
        engine.clone(),
        stores.queue.clone(),
        config.worker.step_concurrency,
        config.worker.step_rate,
    ));
    let build_worker = Arc::new(BuildWorker::new(
        build_engine.clone(),
        stores.queue.clone(),
        config.worker.build_concurrency,
    ));

    info!(mode = config.mode.as_str(), "server components initialized");

    Ok(AppContext {
        config,
        tokens,
        auth,
        workflows: stores.workflows,
        runs: stores.runs,
        events: stores.events,
        sites: stores.sites,
        pages: stores.pages,
        versions: stores.versions,
        build_jobs: stores.build_jobs,
        queue: stores.queue,
        engine,
        publish,
        resolver,
        push_bus,
        probes: Arc::new(stores.probes),
        step_worker,
        build_engine,
        build_worker,
    })
}
