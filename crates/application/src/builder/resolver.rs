//! Site resolver
//!
//! Translates `(subdomain, requestPath)` into artifact bytes. The
//! subdomain → active version lookup is cached for 30 seconds in a
//! bounded map and invalidated explicitly on publish and rollback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atelier_core::{DomainError, Result};
use atelier_ports::{ObjectStore, SiteRepository, SiteVersionRepository};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

pub const CACHE_TTL: Duration = Duration::from_secs(30);
const CACHE_CAPACITY: usize = 1024;

pub const ASSET_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
pub const PAGE_CACHE_CONTROL: &str = "public, max-age=60, s-maxage=300";

#[derive(Debug, Clone)]
struct CachedSite {
    artifact_prefix: String,
    version: i32,
    expires_at: Instant,
}

/// A resolved artifact plus the headers the serve layer should emit.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub version: i32,
    pub cache_control: &'static str,
}

pub struct SiteResolver {
    sites: Arc<dyn SiteRepository>,
    versions: Arc<dyn SiteVersionRepository>,
    store: Arc<dyn ObjectStore>,
    cache: RwLock<HashMap<String, CachedSite>>,
    ttl: Duration,
}

impl SiteResolver {
    pub fn new(
        sites: Arc<dyn SiteRepository>,
        versions: Arc<dyn SiteVersionRepository>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            sites,
            versions,
            store,
            cache: RwLock::new(HashMap::new()),
            ttl: CACHE_TTL,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Drop the cached entry for a subdomain; called on publish/rollback.
    pub async fn invalidate(&self, subdomain: &str) {
        self.cache.write().await.remove(subdomain);
        debug!(subdomain, "resolver cache invalidated");
    }

    pub async fn resolve(&self, subdomain: &str, request_path: &str) -> Result<Resolved> {
        let cached = self.lookup(subdomain).await?;
        let prefix = &cached.artifact_prefix;

        let path = normalize(request_path);
        if is_asset_path(&path) {
            let key = format!("{prefix}{path}");
            return match self.store.get(&key).await? {
                Some(object) => Ok(Resolved {
                    status: 200,
                    bytes: object.bytes,
                    content_type: object.content_type,
                    version: cached.version,
                    cache_control: ASSET_CACHE_CONTROL,
                }),
                None => Err(DomainError::not_found(format!("asset {path}"))),
            };
        }

        let key = if path == "/" {
            format!("{prefix}/index.html")
        } else {
            format!("{prefix}{path}/index.html")
        };

        if let Some(object) = self.store.get(&key).await? {
            return Ok(Resolved {
                status: 200,
                bytes: object.bytes,
                content_type: object.content_type,
                version: cached.version,
                cache_control: PAGE_CACHE_CONTROL,
            });
        }

        // Page miss falls back to the version's own 404 document.
        match self.store.get(&format!("{prefix}/404.html")).await? {
            Some(object) => Ok(Resolved {
                status: 404,
                bytes: object.bytes,
                content_type: object.content_type,
                version: cached.version,
                cache_control: PAGE_CACHE_CONTROL,
            }),
            None => Err(DomainError::not_found(format!("page {path}"))),
        }
    }

    async fn lookup(&self, subdomain: &str) -> Result<CachedSite> {
        if let Some(entry) = self.cache.read().await.get(subdomain) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.clone());
            }
        }

        let site = self
            .sites
            .get_by_subdomain(subdomain)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("site {subdomain}")))?;
        let active = site
            .active_version_id
            .ok_or_else(|| DomainError::not_found(format!("site {subdomain} has no published version")))?;
        let version = self
            .versions
            .get(site.id, active)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("version for {subdomain}")))?;

        let entry = CachedSite {
            artifact_prefix: version.artifact_prefix.clone(),
            version: version.version,
            expires_at: Instant::now() + self.ttl,
        };

        let mut cache = self.cache.write().await;
        if cache.len() >= CACHE_CAPACITY {
            let now = Instant::now();
            cache.retain(|_, v| v.expires_at > now);
            if cache.len() >= CACHE_CAPACITY {
                // Still full after dropping expired entries; drop one.
                if let Some(key) = cache.keys().next().cloned() {
                    cache.remove(&key);
                }
            }
        }
        cache.insert(subdomain.to_string(), entry.clone());
        Ok(entry)
    }
}

fn normalize(request_path: &str) -> String {
    let mut path = request_path.trim().to_string();
    if path.is_empty() {
        return "/".to_string();
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if path.len() > 1 && path.ends_with('/') {
        path.truncate(path.len() - 1);
    }
    path
}

/// `/.*\.\w+$`: a final segment with an extension is a static asset.
fn is_asset_path(path: &str) -> bool {
    let Some(last) = path.rsplit('/').next() else {
        return false;
    };
    match last.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_adapters::memory::MemoryRepos;
    use atelier_adapters::MemoryObjectStore;
    use atelier_core::site::{Site, SiteSettings};
    use atelier_core::version::{SiteVersion, VersionStatus};
    use atelier_core::{Tenant, TenantId};
    use atelier_ports::{SiteRepository, SiteVersionRepository};

    async fn seed(
        repos: &MemoryRepos,
        store: &MemoryObjectStore,
        tenant: TenantId,
        version: i32,
    ) -> SiteVersion {
        let site = match repos.get_by_subdomain("acme").await.unwrap() {
            Some(site) => site,
            None => {
                let site =
                    Site::new(tenant, "Acme", "acme", "acme", SiteSettings::default()).unwrap();
                SiteRepository::create(repos, &site).await.unwrap();
                site
            }
        };
        let mut v = SiteVersion::new(tenant, site.id, version);
        v.status = VersionStatus::Ready;
        let job = atelier_core::version::BuildJob::new(v.id, tenant);
        repos.create_with_job(&v, &job).await.unwrap();
        store
            .put(
                &format!("{}/index.html", v.artifact_prefix),
                format!("version {version}").into_bytes(),
                "text/html; charset=utf-8",
            )
            .await
            .unwrap();

        let mut site = repos.get_by_subdomain("acme").await.unwrap().unwrap();
        site.active_version_id = Some(v.id);
        SiteRepository::update(repos, &site).await.unwrap();
        v
    }

    #[tokio::test]
    async fn cache_serves_stale_until_invalidated() {
        let repos = Arc::new(MemoryRepos::new());
        let store = Arc::new(MemoryObjectStore::new());
        let tenant = Tenant::new("acme").unwrap().id;
        let resolver = SiteResolver::new(repos.clone(), repos.clone(), store.clone())
            .with_ttl(Duration::from_secs(3600));

        seed(&repos, &store, tenant, 1).await;
        assert_eq!(resolver.resolve("acme", "/").await.unwrap().version, 1);

        // The pointer moved, but the cached triple is still live.
        seed(&repos, &store, tenant, 2).await;
        assert_eq!(resolver.resolve("acme", "/").await.unwrap().version, 1);

        // Explicit invalidation forces a fresh lookup.
        resolver.invalidate("acme").await;
        let resolved = resolver.resolve("acme", "/").await.unwrap();
        assert_eq!(resolved.version, 2);
        assert_eq!(resolved.bytes, b"version 2");
    }

    #[test]
    fn classifies_paths() {
        assert!(is_asset_path("/styles/main.css"));
        assert!(is_asset_path("/logo.svg"));
        assert!(!is_asset_path("/"));
        assert!(!is_asset_path("/about"));
        assert!(!is_asset_path("/docs/getting-started"));
        assert!(!is_asset_path("/trailing."));
    }

    #[test]
    fn normalizes_request_paths() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("about"), "/about");
        assert_eq!(normalize("/about/"), "/about");
    }
}
