//! Site versions, build jobs and the artifact manifest
//!
//! A `SiteVersion` is an immutable snapshot of a site's rendered pages,
//! addressed under `sites/{tenantId}/{siteId}/{version}` in the artifact
//! store. The only observable activation is the `activeVersionId` pointer
//! flip; partially uploaded versions are never referenced by it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DomainError, Result};
use crate::ids::{BuildJobId, SiteId, SiteVersionId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Building,
    Ready,
    Failed,
    Superseded,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "BUILDING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
            Self::Superseded => "SUPERSEDED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "BUILDING" => Ok(Self::Building),
            "READY" => Ok(Self::Ready),
            "FAILED" => Ok(Self::Failed),
            "SUPERSEDED" => Ok(Self::Superseded),
            other => Err(DomainError::validation(format!(
                "unknown version status: {other}"
            ))),
        }
    }

    /// BUILDING→(READY|FAILED); READY↔SUPERSEDED via publish/rollback.
    pub fn can_transition_to(&self, to: &Self) -> bool {
        matches!(
            (self, to),
            (Self::Building, Self::Ready)
                | (Self::Building, Self::Failed)
                | (Self::Ready, Self::Superseded)
                | (Self::Superseded, Self::Ready)
        )
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteVersion {
    pub id: SiteVersionId,
    pub site_id: SiteId,
    /// Monotonically increasing per site, starting at 1.
    pub version: i32,
    pub artifact_prefix: String,
    pub status: VersionStatus,
    pub page_count: i32,
    pub asset_size: i64,
    pub manifest_hash: Option<String>,
    pub build_duration_ms: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SiteVersion {
    pub fn new(tenant_id: TenantId, site_id: SiteId, version: i32) -> Self {
        Self {
            id: SiteVersionId::new(),
            site_id,
            version,
            artifact_prefix: artifact_prefix(tenant_id, site_id, version),
            status: VersionStatus::Building,
            page_count: 0,
            asset_size: 0,
            manifest_hash: None,
            build_duration_ms: None,
            published_at: None,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: VersionStatus) -> Result<()> {
        if !self.status.can_transition_to(&to) {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                to.as_str(),
            ));
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_ready(
        &mut self,
        page_count: i32,
        asset_size: i64,
        manifest_hash: String,
        build_duration_ms: i64,
    ) -> Result<()> {
        self.transition(VersionStatus::Ready)?;
        self.page_count = page_count;
        self.asset_size = asset_size;
        self.manifest_hash = Some(manifest_hash);
        self.build_duration_ms = Some(build_duration_ms);
        self.published_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<()> {
        self.transition(VersionStatus::Failed)
    }

    pub fn supersede(&mut self) -> Result<()> {
        self.transition(VersionStatus::Superseded)
    }

    /// Rollback promotes a superseded version back to READY.
    pub fn promote(&mut self) -> Result<()> {
        self.transition(VersionStatus::Ready)
    }
}

pub fn artifact_prefix(tenant_id: TenantId, site_id: SiteId, version: i32) -> String {
    format!("sites/{tenant_id}/{site_id}/{version}")
}

/// `"/" → "index.html"`, `"/a/b" → "a/b/index.html"`.
pub fn page_path_to_file(path: &str) -> String {
    if path == "/" {
        return "index.html".to_string();
    }
    format!("{}/index.html", path.trim_start_matches('/'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl BuildJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(DomainError::validation(format!(
                "unknown build job status: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: BuildJobId,
    pub site_version_id: SiteVersionId,
    pub tenant_id: TenantId,
    pub status: BuildJobStatus,
    pub retry_count: u32,
    pub worker_id: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BuildJob {
    pub fn new(site_version_id: SiteVersionId, tenant_id: TenantId) -> Self {
        Self {
            id: BuildJobId::new(),
            site_version_id,
            tenant_id,
            status: BuildJobStatus::Queued,
            retry_count: 0,
            worker_id: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPage {
    pub path: String,
    pub artifact_key: String,
    pub title: String,
    /// SHA-256 of the rendered HTML, hex-encoded.
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAsset {
    pub key: String,
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: i32,
    pub site_id: SiteId,
    pub tenant_id: TenantId,
    pub generated_at: DateTime<Utc>,
    pub pages: Vec<ManifestPage>,
    pub assets: Vec<ManifestAsset>,
    pub total_size: u64,
    /// SHA-256 over the concatenated page hashes, in page order.
    pub checksum: String,
}

impl Manifest {
    pub fn new(
        version: i32,
        site_id: SiteId,
        tenant_id: TenantId,
        pages: Vec<ManifestPage>,
        assets: Vec<ManifestAsset>,
    ) -> Self {
        let total_size = pages.iter().map(|p| p.size).sum::<u64>()
            + assets.iter().map(|a| a.size).sum::<u64>();
        let checksum = Self::checksum_of(&pages);
        Self {
            version,
            site_id,
            tenant_id,
            generated_at: Utc::now(),
            pages,
            assets,
            total_size,
            checksum,
        }
    }

    pub fn checksum_of(pages: &[ManifestPage]) -> String {
        let mut hasher = Sha256::new();
        for page in pages {
            hasher.update(page.hash.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Hex-encoded SHA-256 of arbitrary bytes (page HTML, assets).
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_path_mapping() {
        assert_eq!(page_path_to_file("/"), "index.html");
        assert_eq!(page_path_to_file("/about"), "about/index.html");
        assert_eq!(page_path_to_file("/a/b"), "a/b/index.html");
    }

    #[test]
    fn version_lifecycle() {
        let mut v = SiteVersion::new(TenantId::new(), SiteId::new(), 1);
        assert_eq!(v.status, VersionStatus::Building);
        v.mark_ready(2, 1024, "abc".to_string(), 150).unwrap();
        assert_eq!(v.status, VersionStatus::Ready);
        assert!(v.published_at.is_some());
        v.supersede().unwrap();
        v.promote().unwrap();
        assert_eq!(v.status, VersionStatus::Ready);
    }

    #[test]
    fn failed_version_cannot_be_promoted() {
        let mut v = SiteVersion::new(TenantId::new(), SiteId::new(), 1);
        v.mark_failed().unwrap();
        assert!(v.promote().is_err());
        assert!(v.supersede().is_err());
    }

    #[test]
    fn artifact_prefix_layout() {
        let tenant = TenantId::new();
        let site = SiteId::new();
        assert_eq!(
            artifact_prefix(tenant, site, 3),
            format!("sites/{tenant}/{site}/3")
        );
    }

    #[test]
    fn manifest_checksum_is_order_sensitive() {
        let page = |hash: &str| ManifestPage {
            path: "/".to_string(),
            artifact_key: "index.html".to_string(),
            title: "Home".to_string(),
            hash: hash.to_string(),
            size: 10,
        };
        let forward = Manifest::checksum_of(&[page("aa"), page("bb")]);
        let reverse = Manifest::checksum_of(&[page("bb"), page("aa")]);
        assert_ne!(forward, reverse);
        assert_eq!(forward, Manifest::checksum_of(&[page("aa"), page("bb")]));
    }

    #[test]
    fn manifest_totals() {
        let pages = vec![
            ManifestPage {
                path: "/".to_string(),
                artifact_key: "index.html".to_string(),
                title: "Home".to_string(),
                hash: sha256_hex(b"<html>"),
                size: 100,
            },
            ManifestPage {
                path: "/about".to_string(),
                artifact_key: "about/index.html".to_string(),
                title: "About".to_string(),
                hash: sha256_hex(b"<html>about"),
                size: 150,
            },
        ];
        let manifest = Manifest::new(1, SiteId::new(), TenantId::new(), pages, vec![]);
        assert_eq!(manifest.total_size, 250);
        assert_eq!(manifest.checksum.len(), 64);
    }
}
