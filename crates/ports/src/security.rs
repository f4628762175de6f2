//! Authentication ports
//!
//! Token signing/verification and password hashing are external
//! collaborators; these traits are their contracts.

use atelier_core::{Result, TenantId, User, UserId, UserRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthClaims {
    /// User id.
    pub sub: UserId,
    pub tenant_id: TenantId,
    pub role: UserRole,
    pub iat: usize,
    pub exp: usize,
}

pub trait TokenService: Send + Sync {
    fn issue(&self, user: &User) -> Result<String>;

    fn verify(&self, token: &str) -> Result<AuthClaims>;
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;

    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}
