//! End-to-end build and serve scenarios over the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use atelier_adapters::memory::{MemoryJobQueue, MemoryRepos};
use atelier_adapters::MemoryObjectStore;
use atelier_ports::ObjectStore;
use atelier_application::builder::{
    BuildEngine, BuildPayload, PublishService, SiteResolver, BUILD_QUEUE,
};
use atelier_application::builder::build_worker::BuildConfig;
use atelier_core::content::{HeroSection, PageContent, Section, TextSection};
use atelier_core::pagination::PageRequest;
use atelier_core::site::{Page, Site, SiteSettings};
use atelier_core::version::{BuildJobStatus, VersionStatus};
use atelier_core::{DomainError, SiteId, Tenant, TenantId};
use atelier_ports::{JobQueue, PageRepository, SiteRepository, SiteVersionRepository};
use serde_json::json;

struct Harness {
    repos: Arc<MemoryRepos>,
    queue: Arc<MemoryJobQueue>,
    store: Arc<MemoryObjectStore>,
    resolver: Arc<SiteResolver>,
    publish: PublishService,
    engine: Arc<BuildEngine>,
    tenant: TenantId,
}

fn harness() -> Harness {
    let repos = Arc::new(MemoryRepos::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let store = Arc::new(MemoryObjectStore::new());
    let resolver = Arc::new(SiteResolver::new(
        repos.clone(),
        repos.clone(),
        store.clone(),
    ));
    let publish = PublishService::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        queue.clone(),
        resolver.clone(),
    );
    let engine = Arc::new(BuildEngine::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        repos.clone(),
        store.clone(),
        queue.clone(),
        resolver.clone(),
        BuildConfig {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            worker_id: "test-worker".to_string(),
        },
    ));
    let tenant = Tenant::new("acme").unwrap();
    Harness {
        repos,
        queue,
        store,
        resolver,
        publish,
        engine,
        tenant: tenant.id,
    }
}

impl Harness {
    async fn add_site(&self, subdomain: &str) -> Site {
        let site = Site::new(
            self.tenant,
            "Acme",
            subdomain,
            subdomain,
            SiteSettings::default(),
        )
        .unwrap();
        SiteRepository::create(self.repos.as_ref(), &site)
            .await
            .unwrap();
        site
    }

    async fn add_page(&self, site: SiteId, path: &str, heading: &str) -> Page {
        let content = PageContent {
            sections: vec![Section::Hero(HeroSection {
                heading: heading.to_string(),
                ..Default::default()
            })],
        };
        let mut page = Page::new(site, path, heading, content).unwrap();
        page.sort_order = if path == "/" { 0 } else { 1 };
        PageRepository::create(self.repos.as_ref(), &page)
            .await
            .unwrap();
        page
    }

    /// Drain the build queue, executing jobs inline.
    async fn drive(&self) {
        loop {
            match self
                .queue
                .pop(BUILD_QUEUE, Duration::from_secs(30))
                .await
                .unwrap()
            {
                Some(payload) => {
                    let job: BuildPayload = serde_json::from_value(payload).unwrap();
                    self.engine.execute_build(&job).await.unwrap();
                }
                None => break,
            }
        }
    }
}

// Publish then serve: both pages serve their HTML, a missing path gets
// the 404 body with status 404.
#[tokio::test(start_paused = true)]
async fn publish_then_serve_pages_and_404() {
    let h = harness();
    let site = h.add_site("acme").await;
    h.add_page(site.id, "/", "Welcome home").await;
    h.add_page(site.id, "/about", "About us").await;

    let (version, job) = h.publish.publish(h.tenant, site.id).await.unwrap();
    assert_eq!(version.version, 1);
    assert_eq!(version.status, VersionStatus::Building);
    assert_eq!(job.status, BuildJobStatus::Queued);

    h.drive().await;

    let home = h.resolver.resolve("acme", "/").await.unwrap();
    assert_eq!(home.status, 200);
    assert_eq!(home.version, 1);
    assert_eq!(home.content_type, "text/html; charset=utf-8");
    assert!(String::from_utf8(home.bytes).unwrap().contains("Welcome home"));

    let about = h.resolver.resolve("acme", "/about").await.unwrap();
    assert_eq!(about.status, 200);
    assert!(String::from_utf8(about.bytes).unwrap().contains("About us"));

    let missing = h.resolver.resolve("acme", "/missing").await.unwrap();
    assert_eq!(missing.status, 404);
    assert!(String::from_utf8(missing.bytes).unwrap().contains("Page not found"));

    // The artifact layout matches the prefix contract.
    let keys = h.store.keys().await;
    let prefix = format!("sites/{}/{}/1", h.tenant, site.id);
    assert!(keys.contains(&format!("{prefix}/index.html")));
    assert!(keys.contains(&format!("{prefix}/about/index.html")));
    assert!(keys.contains(&format!("{prefix}/404.html")));
    assert!(keys.contains(&format!("{prefix}/manifest.json")));
}

// The manifest checksum covers the page hashes in order.
#[tokio::test(start_paused = true)]
async fn manifest_records_hashes_and_checksum() {
    let h = harness();
    let site = h.add_site("acme").await;
    h.add_page(site.id, "/", "Home").await;

    h.publish.publish(h.tenant, site.id).await.unwrap();
    h.drive().await;

    let prefix = format!("sites/{}/{}/1", h.tenant, site.id);
    let raw = h
        .store
        .get(&format!("{prefix}/manifest.json"))
        .await
        .unwrap()
        .unwrap();
    let manifest: serde_json::Value = serde_json::from_slice(&raw.bytes).unwrap();

    assert_eq!(manifest["version"], json!(1));
    assert_eq!(manifest["pages"].as_array().unwrap().len(), 1);
    let hash = manifest["pages"][0]["hash"].as_str().unwrap();
    assert_eq!(hash.len(), 64);

    // Recompute the checksum from the page hashes.
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(hash.as_bytes());
    assert_eq!(
        manifest["checksum"].as_str().unwrap(),
        format!("{:x}", hasher.finalize())
    );

    let version = SiteVersionRepository::list(h.repos.as_ref(), site.id, PageRequest::default())
        .await
        .unwrap()
        .data
        .remove(0);
    assert_eq!(version.manifest_hash.as_deref(), Some(manifest["checksum"].as_str().unwrap()));
    assert_eq!(version.page_count, 1);
}

// Rollback: version 1 serves again, version 2 is superseded, and the
// next publish picks version 3.
#[tokio::test(start_paused = true)]
async fn rollback_restores_prior_version() {
    let h = harness();
    let site = h.add_site("acme").await;
    let mut home = h.add_page(site.id, "/", "First edition").await;

    let (v1, _) = h.publish.publish(h.tenant, site.id).await.unwrap();
    h.drive().await;

    home.title = "Second edition".to_string();
    home.content = PageContent {
        sections: vec![Section::Text(TextSection {
            heading: None,
            body: "Second edition".to_string(),
            alignment: Default::default(),
        })],
    };
    PageRepository::update(h.repos.as_ref(), &home).await.unwrap();

    let (v2, _) = h.publish.publish(h.tenant, site.id).await.unwrap();
    assert_eq!(v2.version, 2);
    h.drive().await;

    let served = h.resolver.resolve("acme", "/").await.unwrap();
    assert_eq!(served.version, 2);
    assert!(String::from_utf8(served.bytes).unwrap().contains("Second edition"));

    // Roll back to version 1.
    let restored = h.publish.rollback(h.tenant, site.id, v1.id).await.unwrap();
    assert_eq!(restored.status, VersionStatus::Ready);

    let site_now = SiteRepository::get(h.repos.as_ref(), h.tenant, site.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(site_now.active_version_id, Some(v1.id));

    let v2_now = SiteVersionRepository::get(h.repos.as_ref(), site.id, v2.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v2_now.status, VersionStatus::Superseded);

    let served = h.resolver.resolve("acme", "/").await.unwrap();
    assert_eq!(served.version, 1);
    assert!(String::from_utf8(served.bytes).unwrap().contains("First edition"));

    // A subsequent publish increments by exactly one.
    let (v3, _) = h.publish.publish(h.tenant, site.id).await.unwrap();
    assert_eq!(v3.version, 3);
}

// Publishing with zero published pages is a validation error.
#[tokio::test(start_paused = true)]
async fn publish_requires_published_pages() {
    let h = harness();
    let site = h.add_site("acme").await;
    let mut page = h.add_page(site.id, "/", "Hidden").await;
    page.is_published = false;
    PageRepository::update(h.repos.as_ref(), &page).await.unwrap();

    let err = h.publish.publish(h.tenant, site.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation { .. }));
}

// Rolling back to a BUILDING or FAILED version is rejected.
#[tokio::test(start_paused = true)]
async fn rollback_rejects_unready_versions() {
    let h = harness();
    let site = h.add_site("acme").await;
    h.add_page(site.id, "/", "Home").await;

    let (v1, _) = h.publish.publish(h.tenant, site.id).await.unwrap();
    // Still BUILDING: the build has not run yet.
    let err = h.publish.rollback(h.tenant, site.id, v1.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation { .. }));
}

// A failed build exhausts its retries, marks the version FAILED, and
// leaves the active pointer (and the served site) untouched.
#[tokio::test(start_paused = true)]
async fn failed_build_keeps_previous_version_live() {
    let h = harness();
    let site = h.add_site("acme").await;
    let page = h.add_page(site.id, "/", "Stable").await;

    let (v1, _) = h.publish.publish(h.tenant, site.id).await.unwrap();
    h.drive().await;

    let (v2, _) = h.publish.publish(h.tenant, site.id).await.unwrap();

    // Builds read current state: unpublishing between enqueue and
    // execution starves every attempt of pages.
    let mut hidden = page.clone();
    hidden.is_published = false;
    PageRepository::update(h.repos.as_ref(), &hidden).await.unwrap();

    h.drive().await;

    let v2_now = SiteVersionRepository::get(h.repos.as_ref(), site.id, v2.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v2_now.status, VersionStatus::Failed);

    let site_now = SiteRepository::get(h.repos.as_ref(), h.tenant, site.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(site_now.active_version_id, Some(v1.id));

    let served = h.resolver.resolve("acme", "/").await.unwrap();
    assert_eq!(served.version, 1);
}

// Serve headers: assets are immutable, pages short-lived.
#[tokio::test(start_paused = true)]
async fn cache_control_classes() {
    let h = harness();
    let site = h.add_site("acme").await;
    h.add_page(site.id, "/", "Home").await;
    h.publish.publish(h.tenant, site.id).await.unwrap();
    h.drive().await;

    // Drop an asset alongside the rendered pages.
    let prefix = format!("sites/{}/{}/1", h.tenant, site.id);
    h.store
        .put(&format!("{prefix}/styles/main.css"), b"body{}".to_vec(), "text/css")
        .await
        .unwrap();

    let asset = h.resolver.resolve("acme", "/styles/main.css").await.unwrap();
    assert_eq!(asset.cache_control, "public, max-age=31536000, immutable");
    assert_eq!(asset.content_type, "text/css");

    let page = h.resolver.resolve("acme", "/").await.unwrap();
    assert_eq!(page.cache_control, "public, max-age=60, s-maxage=300");

    // A missing asset is a plain 404 with no page fallback.
    assert!(h.resolver.resolve("acme", "/styles/missing.css").await.is_err());
}

// A foreign tenant cannot see or publish the site.
#[tokio::test(start_paused = true)]
async fn sites_are_tenant_scoped() {
    let h = harness();
    let site = h.add_site("acme").await;
    h.add_page(site.id, "/", "Home").await;

    let stranger = TenantId::new();
    assert!(SiteRepository::get(h.repos.as_ref(), stranger, site.id)
        .await
        .unwrap()
        .is_none());
    assert!(h.publish.publish(stranger, site.id).await.is_err());
}
