//! Authentication service
//!
//! Registration creates a tenant and its ADMIN user in one flow and
//! returns a bearer token; login verifies credentials and re-issues.
//! Hashing and signing stay behind their ports.

use std::sync::Arc;

use atelier_core::{DomainError, Result, Tenant, User, UserRole};
use atelier_ports::{PasswordHasher, TenantRepository, TokenService, UserRepository};
use tracing::info;

pub struct AuthService {
    tenants: Arc<dyn TenantRepository>,
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenService>,
}

#[derive(Debug)]
pub struct AuthOutcome {
    pub user: User,
    pub token: String,
}

const MIN_PASSWORD_LEN: usize = 8;

impl AuthService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        users: Arc<dyn UserRepository>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenService>,
    ) -> Self {
        Self {
            tenants,
            users,
            hasher,
            tokens,
        }
    }

    pub async fn register(
        &self,
        tenant_name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthOutcome> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(DomainError::validation_fields(
                format!("password must be at least {MIN_PASSWORD_LEN} characters"),
                vec!["password".to_string()],
            ));
        }
        if self.users.find_by_email(email).await?.is_some() {
            return Err(DomainError::Conflict("email already registered".to_string()));
        }

        let tenant = Tenant::new(tenant_name)?;
        let hash = self.hasher.hash(password)?;
        let user = User::new(tenant.id, email, hash, UserRole::Admin)?;

        self.tenants.create(&tenant).await?;
        self.users.create(&user).await?;

        let token = self.tokens.issue(&user)?;
        info!(tenant_id = %tenant.id, "tenant registered");
        Ok(AuthOutcome { user, token })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthOutcome> {
        // One error for both unknown email and bad password.
        let denied = || DomainError::Unauthorized("invalid credentials".to_string());

        let user = self.users.find_by_email(email).await?.ok_or_else(denied)?;
        if !self.hasher.verify(password, &user.password_hash)? {
            return Err(denied());
        }

        let token = self.tokens.issue(&user)?;
        Ok(AuthOutcome { user, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_adapters::memory::MemoryRepos;
    use atelier_adapters::{JwtTokenService, Sha256PasswordHasher};

    fn service() -> AuthService {
        let repos = Arc::new(MemoryRepos::new());
        AuthService::new(
            repos.clone(),
            repos,
            Arc::new(Sha256PasswordHasher),
            Arc::new(JwtTokenService::new("test-secret-key", 3600)),
        )
    }

    #[tokio::test]
    async fn register_then_login() {
        let auth = service();
        let registered = auth
            .register("acme", "ada@acme.dev", "correct-horse")
            .await
            .unwrap();
        assert_eq!(registered.user.role, UserRole::Admin);
        assert!(!registered.token.is_empty());

        let logged_in = auth.login("ada@acme.dev", "correct-horse").await.unwrap();
        assert_eq!(logged_in.user.id, registered.user.id);
    }

    #[tokio::test]
    async fn rejects_duplicate_email() {
        let auth = service();
        auth.register("acme", "ada@acme.dev", "correct-horse")
            .await
            .unwrap();
        let err = auth
            .register("other", "ada@acme.dev", "different-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn rejects_short_password() {
        let auth = service();
        assert!(auth.register("acme", "a@b.c", "short").await.is_err());
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let auth = service();
        auth.register("acme", "ada@acme.dev", "correct-horse")
            .await
            .unwrap();
        let err = auth.login("ada@acme.dev", "wrong-horse").await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
        let err = auth.login("ghost@acme.dev", "whatever-pw").await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }
}
