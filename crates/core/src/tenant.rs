//! Tenancy entities
//!
//! Ownership is hierarchical: a `Tenant` owns users, workflows, runs, sites,
//! versions and pages. Every repository query carries a tenant constraint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::ids::{TenantId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation_fields(
                "tenant name cannot be empty",
                vec!["name".to_string()],
            ));
        }
        Ok(Self {
            id: TenantId::new(),
            name,
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Member,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "MEMBER" => Ok(Self::Member),
            other => Err(DomainError::validation(format!("unknown role: {other}"))),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    /// Opaque hash produced by the configured password hasher.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        tenant_id: TenantId,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        role: UserRole,
    ) -> Result<Self> {
        let email = email.into();
        if !email.contains('@') || email.len() < 3 {
            return Err(DomainError::validation_fields(
                "invalid email address",
                vec!["email".to_string()],
            ));
        }
        Ok(Self {
            id: UserId::new(),
            tenant_id,
            email,
            password_hash: password_hash.into(),
            role,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_tenant_name() {
        assert!(Tenant::new("  ").is_err());
    }

    #[test]
    fn rejects_invalid_email() {
        let tenant = Tenant::new("acme").unwrap();
        assert!(User::new(tenant.id, "not-an-email", "h", UserRole::Admin).is_err());
    }

    #[test]
    fn role_round_trip() {
        assert_eq!(UserRole::parse("ADMIN").unwrap(), UserRole::Admin);
        assert_eq!(UserRole::Member.as_str(), "MEMBER");
        assert!(UserRole::parse("ROOT").is_err());
    }
}
