//! Site and Page entities
//!
//! A `Site` is a tenant's publishable website: settings (theme, navigation,
//! footer), a set of structured pages, and a pointer to the version it
//! currently serves. Pages are freely edited; the next publish snapshots
//! current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::PageContent;
use crate::error::{DomainError, Result};
use crate::ids::{PageId, SiteId, SiteVersionId, TenantId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Unique per tenant.
    pub slug: String,
    /// Globally unique.
    pub subdomain: String,
    pub settings: SiteSettings,
    pub active_version_id: Option<SiteVersionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        slug: impl Into<String>,
        subdomain: impl Into<String>,
        settings: SiteSettings,
    ) -> Result<Self> {
        let name = name.into();
        let slug = slug.into();
        let subdomain = subdomain.into();
        let mut fields = Vec::new();
        if name.trim().is_empty() {
            fields.push("name".to_string());
        }
        if !is_valid_slug(&slug) {
            fields.push("slug".to_string());
        }
        if !is_valid_slug(&subdomain) {
            fields.push("subdomain".to_string());
        }
        if !fields.is_empty() {
            return Err(DomainError::validation_fields("invalid site", fields));
        }
        let now = Utc::now();
        Ok(Self {
            id: SiteId::new(),
            tenant_id,
            name,
            slug,
            subdomain,
            settings,
            active_version_id: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Lowercase alphanumerics and hyphens, no leading/trailing hyphen.
pub fn is_valid_slug(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteSettings {
    pub colors: ThemeColors,
    pub fonts: ThemeFonts,
    pub navigation: Vec<NavItem>,
    pub footer: Option<FooterSettings>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            colors: ThemeColors::default(),
            fonts: ThemeFonts::default(),
            navigation: Vec::new(),
            footer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThemeColors {
    pub primary: String,
    pub secondary: String,
    pub background: String,
    pub text: String,
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self {
            primary: "#2563eb".to_string(),
            secondary: "#7c3aed".to_string(),
            background: "#ffffff".to_string(),
            text: "#111827".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThemeFonts {
    pub heading: String,
    pub body: String,
}

impl Default for ThemeFonts {
    fn default() -> Self {
        Self {
            heading: "Inter, sans-serif".to_string(),
            body: "Inter, sans-serif".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavItem {
    pub label: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FooterSettings {
    pub text: String,
    #[serde(default)]
    pub links: Vec<NavItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    /// Starts with `/`, unique within the site.
    pub path: String,
    pub title: String,
    pub content: PageContent,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub is_published: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn new(
        site_id: SiteId,
        path: impl Into<String>,
        title: impl Into<String>,
        content: PageContent,
    ) -> Result<Self> {
        let path = path.into();
        validate_page_path(&path)?;
        let now = Utc::now();
        Ok(Self {
            id: PageId::new(),
            site_id,
            path,
            title: title.into(),
            content,
            seo_title: None,
            seo_description: None,
            is_published: true,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A page path is `/` or `/segment(/segment)*` where segments use
/// lowercase alphanumerics, hyphens and underscores.
pub fn validate_page_path(path: &str) -> Result<()> {
    let invalid = || {
        DomainError::validation_fields(
            format!("invalid page path: {path}"),
            vec!["path".to_string()],
        )
    };
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') {
        return Err(invalid());
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(invalid());
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(invalid());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_page_paths() {
        assert!(validate_page_path("/").is_ok());
        assert!(validate_page_path("/about").is_ok());
        assert!(validate_page_path("/docs/getting-started").is_ok());
        assert!(validate_page_path("/a_b/c-1").is_ok());

        assert!(validate_page_path("").is_err());
        assert!(validate_page_path("about").is_err());
        assert!(validate_page_path("/about/").is_err());
        assert!(validate_page_path("//about").is_err());
        assert!(validate_page_path("/About").is_err());
        assert!(validate_page_path("/with space").is_err());
        assert!(validate_page_path("/q?x=1").is_err());
    }

    #[test]
    fn validates_slugs() {
        assert!(is_valid_slug("acme-docs"));
        assert!(is_valid_slug("a1"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("-lead"));
        assert!(!is_valid_slug("trail-"));
        assert!(!is_valid_slug("UpperCase"));
        assert!(!is_valid_slug("dot.dot"));
    }

    #[test]
    fn site_rejects_bad_subdomain() {
        let err = Site::new(
            TenantId::new(),
            "Acme",
            "acme",
            "Not A Subdomain",
            SiteSettings::default(),
        )
        .unwrap_err();
        match err {
            DomainError::Validation { fields, .. } => {
                assert!(fields.contains(&"subdomain".to_string()))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn settings_default_round_trips() {
        let settings = SiteSettings::default();
        let json = serde_json::to_value(&settings).unwrap();
        let back: SiteSettings = serde_json::from_value(json).unwrap();
        assert_eq!(settings, back);
    }
}
