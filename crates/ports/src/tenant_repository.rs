//! Tenancy repository ports

use async_trait::async_trait;
use atelier_core::{Result, Tenant, TenantId, User, UserId};

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn create(&self, tenant: &Tenant) -> Result<()>;

    async fn get(&self, id: TenantId) -> Result<Option<Tenant>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email is already registered.
    async fn create(&self, user: &User) -> Result<()>;

    /// Email lookup is global: login happens before a tenant is known.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn get(&self, tenant_id: TenantId, id: UserId) -> Result<Option<User>>;
}
