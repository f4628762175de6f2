//! Site and page repository ports

use async_trait::async_trait;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::site::{Page, Site};
use atelier_core::{PageId, Result, SiteId, TenantId};

#[async_trait]
pub trait SiteRepository: Send + Sync {
    /// Fails with `Conflict` when the `(tenant, slug)` pair or the global
    /// subdomain is taken.
    async fn create(&self, site: &Site) -> Result<()>;

    async fn get(&self, tenant_id: TenantId, id: SiteId) -> Result<Option<Site>>;

    /// Unscoped by design: this is the public serve path.
    async fn get_by_subdomain(&self, subdomain: &str) -> Result<Option<Site>>;

    async fn list(&self, tenant_id: TenantId, page: PageRequest) -> Result<Paginated<Site>>;

    async fn update(&self, site: &Site) -> Result<()>;

    /// Cascades to the site's pages and versions.
    async fn delete(&self, tenant_id: TenantId, id: SiteId) -> Result<()>;
}

#[async_trait]
pub trait PageRepository: Send + Sync {
    /// Fails with `Conflict` on a duplicate `(site, path)`.
    async fn create(&self, page: &Page) -> Result<()>;

    async fn get(&self, site_id: SiteId, id: PageId) -> Result<Option<Page>>;

    async fn list(&self, site_id: SiteId, page: PageRequest) -> Result<Paginated<Page>>;

    /// Published pages ordered by `sort_order`; what a build snapshots.
    async fn list_published(&self, site_id: SiteId) -> Result<Vec<Page>>;

    async fn update(&self, page: &Page) -> Result<()>;

    async fn delete(&self, site_id: SiteId, id: PageId) -> Result<()>;
}
