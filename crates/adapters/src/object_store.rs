//! Artifact store adapters
//!
//! Three implementations of the `ObjectStore` port: a filesystem store for
//! single-node deployments (the default when no endpoint is configured), a
//! path-style HTTP store for S3-compatible gateways, and an in-memory
//! store for tests. Request signing is delegated to the fronting gateway.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::{DomainError, Result};
use atelier_ports::{ObjectStore, StoredObject};
use tokio::sync::RwLock;

use crate::config::ObjectStoreConfig;

/// Filesystem-backed store. Keys map to paths under the root; traversal
/// segments are rejected.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(DomainError::validation(format!(
                "invalid artifact key: {key}"
            )));
        }
        Ok(self.root.join(rel))
    }

    fn content_type_path(path: &Path) -> PathBuf {
        let mut meta = path.as_os_str().to_owned();
        meta.push(".mime");
        PathBuf::from(meta)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Infrastructure(format!("mkdir {parent:?}: {e}")))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("write {path:?}: {e}")))?;
        tokio::fs::write(Self::content_type_path(&path), content_type)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("write content type: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let path = self.resolve(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DomainError::Infrastructure(format!("read {path:?}: {e}")));
            }
        };
        let content_type = tokio::fs::read_to_string(Self::content_type_path(&path))
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        Ok(Some(StoredObject {
            bytes,
            content_type,
        }))
    }
}

/// Path-style HTTP store: `PUT/GET {endpoint}/{bucket}/{key}` against an
/// S3-compatible gateway (MinIO-style deployments with force-path-style).
pub struct HttpObjectStore {
    client: reqwest::Client,
    base: String,
}

impl HttpObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!(
                "{}/{}",
                config.endpoint.trim_end_matches('/'),
                config.bucket
            ),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let response = self
            .client
            .put(self.url(key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| DomainError::Infrastructure(format!("upload {key}: {e}")))?;
        if !response.status().is_success() {
            return Err(DomainError::Infrastructure(format!(
                "upload {key}: gateway returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let response = self
            .client
            .get(self.url(key))
            .send()
            .await
            .map_err(|e| DomainError::Infrastructure(format!("download {key}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DomainError::Infrastructure(format!(
                "download {key}: gateway returned {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DomainError::Infrastructure(format!("download {key}: {e}")))?
            .to_vec();
        Ok(Some(StoredObject {
            bytes,
            content_type,
        }))
    }
}

/// In-memory store used by tests.
#[derive(Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        Ok(self.objects.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryObjectStore::new();
        store
            .put("sites/t/s/1/index.html", b"<html>".to_vec(), "text/html")
            .await
            .unwrap();
        let stored = store.get("sites/t/s/1/index.html").await.unwrap().unwrap();
        assert_eq!(stored.bytes, b"<html>");
        assert_eq!(stored.content_type, "text/html");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[test]
    fn fs_store_rejects_traversal() {
        let store = FsObjectStore::new("/tmp/atelier-test");
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("a/../../b").is_err());
        assert!(store.resolve("sites/t/s/1/index.html").is_ok());
    }
}
