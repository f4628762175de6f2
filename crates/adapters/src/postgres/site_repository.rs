//! PostgreSQL site and page repositories

use async_trait::async_trait;
use atelier_core::content::PageContent;
use atelier_core::pagination::{PageRequest, Paginated};
use atelier_core::site::{Page, Site, SiteSettings};
use atelier_core::{PageId, Result, SiteId, SiteVersionId, TenantId};
use atelier_ports::{PageRepository, SiteRepository};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{map_db_err, map_json_err};

pub(crate) async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            subdomain TEXT NOT NULL UNIQUE,
            settings JSONB NOT NULL,
            active_version_id UUID NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (tenant_id, slug)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create sites table", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id UUID PRIMARY KEY,
            site_id UUID NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            title TEXT NOT NULL,
            content JSONB NOT NULL,
            seo_title TEXT NULL,
            seo_description TEXT NULL,
            is_published BOOLEAN NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (site_id, path)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_db_err("create pages table", e))?;

    Ok(())
}

fn row_to_site(row: &PgRow) -> Result<Site> {
    let settings: SiteSettings = serde_json::from_value(row.get("settings"))
        .map_err(|e| map_json_err("deserialize site settings", e))?;
    Ok(Site {
        id: SiteId::from_uuid(row.get("id")),
        tenant_id: TenantId::from_uuid(row.get("tenant_id")),
        name: row.get("name"),
        slug: row.get("slug"),
        subdomain: row.get("subdomain"),
        settings,
        active_version_id: row
            .get::<Option<uuid::Uuid>, _>("active_version_id")
            .map(SiteVersionId::from_uuid),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_page(row: &PgRow) -> Result<Page> {
    let content: PageContent = serde_json::from_value(row.get("content"))
        .map_err(|e| map_json_err("deserialize page content", e))?;
    Ok(Page {
        id: PageId::from_uuid(row.get("id")),
        site_id: SiteId::from_uuid(row.get("site_id")),
        path: row.get("path"),
        title: row.get("title"),
        content,
        seo_title: row.get("seo_title"),
        seo_description: row.get("seo_description"),
        is_published: row.get("is_published"),
        sort_order: row.get("sort_order"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[derive(Debug, Clone)]
pub struct PgSiteRepository {
    pool: PgPool,
}

impl PgSiteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteRepository for PgSiteRepository {
    async fn create(&self, site: &Site) -> Result<()> {
        let settings = serde_json::to_value(&site.settings)
            .map_err(|e| map_json_err("serialize site settings", e))?;
        sqlx::query(
            r#"
            INSERT INTO sites
                (id, tenant_id, name, slug, subdomain, settings, active_version_id,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(site.id.as_uuid())
        .bind(site.tenant_id.as_uuid())
        .bind(&site.name)
        .bind(&site.slug)
        .bind(&site.subdomain)
        .bind(settings)
        .bind(site.active_version_id.map(|id| id.as_uuid()))
        .bind(site.created_at)
        .bind(site.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("slug or subdomain already taken", e))?;
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: SiteId) -> Result<Option<Site>> {
        let row = sqlx::query("SELECT * FROM sites WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get site", e))?;
        row.as_ref().map(row_to_site).transpose()
    }

    async fn get_by_subdomain(&self, subdomain: &str) -> Result<Option<Site>> {
        let row = sqlx::query("SELECT * FROM sites WHERE subdomain = $1")
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get site by subdomain", e))?;
        row.as_ref().map(row_to_site).transpose()
    }

    async fn list(&self, tenant_id: TenantId, page: PageRequest) -> Result<Paginated<Site>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sites WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_err("count sites", e))?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM sites
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
        .map_err(|e| map_db_err("list sites", e))?;

        let sites = rows.iter().map(row_to_site).collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(sites, total as u64, page))
    }

    async fn update(&self, site: &Site) -> Result<()> {
        let settings = serde_json::to_value(&site.settings)
            .map_err(|e| map_json_err("serialize site settings", e))?;
        sqlx::query(
            r#"
            UPDATE sites
            SET name = $3, slug = $4, subdomain = $5, settings = $6,
                active_version_id = $7, updated_at = $8
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(site.tenant_id.as_uuid())
        .bind(site.id.as_uuid())
        .bind(&site.name)
        .bind(&site.slug)
        .bind(&site.subdomain)
        .bind(settings)
        .bind(site.active_version_id.map(|id| id.as_uuid()))
        .bind(site.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update site", e))?;
        Ok(())
    }

    async fn delete(&self, tenant_id: TenantId, id: SiteId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin delete site", e))?;

        sqlx::query(
            "DELETE FROM build_jobs WHERE site_version_id IN \
             (SELECT id FROM site_versions WHERE site_id = $1)",
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("delete build jobs", e))?;

        sqlx::query("DELETE FROM site_versions WHERE site_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("delete site versions", e))?;

        sqlx::query("DELETE FROM sites WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("delete site", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit delete site", e))
    }
}

#[derive(Debug, Clone)]
pub struct PgPageRepository {
    pool: PgPool,
}

impl PgPageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PageRepository for PgPageRepository {
    async fn create(&self, page: &Page) -> Result<()> {
        let content = serde_json::to_value(&page.content)
            .map_err(|e| map_json_err("serialize page content", e))?;
        sqlx::query(
            r#"
            INSERT INTO pages
                (id, site_id, path, title, content, seo_title, seo_description,
                 is_published, sort_order, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(page.id.as_uuid())
        .bind(page.site_id.as_uuid())
        .bind(&page.path)
        .bind(&page.title)
        .bind(content)
        .bind(&page.seo_title)
        .bind(&page.seo_description)
        .bind(page.is_published)
        .bind(page.sort_order)
        .bind(page.created_at)
        .bind(page.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("page path already exists", e))?;
        Ok(())
    }

    async fn get(&self, site_id: SiteId, id: PageId) -> Result<Option<Page>> {
        let row = sqlx::query("SELECT * FROM pages WHERE site_id = $1 AND id = $2")
            .bind(site_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get page", e))?;
        row.as_ref().map(row_to_page).transpose()
    }

    async fn list(&self, site_id: SiteId, page: PageRequest) -> Result<Paginated<Page>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE site_id = $1")
            .bind(site_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_err("count pages", e))?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM pages
            WHERE site_id = $1
            ORDER BY sort_order ASC, path ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(site_id.as_uuid())
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list pages", e))?;

        let pages = rows.iter().map(row_to_page).collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(pages, total as u64, page))
    }

    async fn list_published(&self, site_id: SiteId) -> Result<Vec<Page>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM pages
            WHERE site_id = $1 AND is_published = TRUE
            ORDER BY sort_order ASC, path ASC
            "#,
        )
        .bind(site_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list published pages", e))?;
        rows.iter().map(row_to_page).collect()
    }

    async fn update(&self, page: &Page) -> Result<()> {
        let content = serde_json::to_value(&page.content)
            .map_err(|e| map_json_err("serialize page content", e))?;
        sqlx::query(
            r#"
            UPDATE pages
            SET path = $3, title = $4, content = $5, seo_title = $6, seo_description = $7,
                is_published = $8, sort_order = $9, updated_at = $10
            WHERE site_id = $1 AND id = $2
            "#,
        )
        .bind(page.site_id.as_uuid())
        .bind(page.id.as_uuid())
        .bind(&page.path)
        .bind(&page.title)
        .bind(content)
        .bind(&page.seo_title)
        .bind(&page.seo_description)
        .bind(page.is_published)
        .bind(page.sort_order)
        .bind(page.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("page path already exists", e))?;
        Ok(())
    }

    async fn delete(&self, site_id: SiteId, id: PageId) -> Result<()> {
        sqlx::query("DELETE FROM pages WHERE site_id = $1 AND id = $2")
            .bind(site_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("delete page", e))?;
        Ok(())
    }
}
