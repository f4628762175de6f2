//! Artifact store port

use async_trait::async_trait;
use atelier_core::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;
}
