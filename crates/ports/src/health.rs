//! Health probe port

use async_trait::async_trait;
use atelier_core::health::ComponentHealth;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn component(&self) -> &str;

    async fn check(&self) -> ComponentHealth;
}
