//! Token and password services
//!
//! HS256 bearer tokens via `jsonwebtoken`. Password hashing sits behind
//! the `PasswordHasher` port; the bundled implementation is a salted,
//! iterated SHA-256 KDF with constant-time comparison.

use std::time::{SystemTime, UNIX_EPOCH};

use atelier_core::{DomainError, Result, User};
use atelier_ports::{AuthClaims, PasswordHasher, TokenService};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub struct JwtTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_seconds: u64,
}

impl JwtTokenService {
    pub fn new(secret: &str, expiration_seconds: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_seconds,
        }
    }

    fn now() -> Result<usize> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as usize)
            .map_err(|e| DomainError::Infrastructure(e.to_string()))
    }
}

impl TokenService for JwtTokenService {
    fn issue(&self, user: &User) -> Result<String> {
        let now = Self::now()?;
        let claims = AuthClaims {
            sub: user.id,
            tenant_id: user.tenant_id,
            role: user.role,
            iat: now,
            exp: now + self.expiration_seconds as usize,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| DomainError::Unauthorized(format!("failed to sign token: {e}")))
    }

    fn verify(&self, token: &str) -> Result<AuthClaims> {
        let data = decode::<AuthClaims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| DomainError::Unauthorized(format!("invalid token: {e}")))?;
        Ok(data.claims)
    }
}

const KDF_ITERATIONS: u32 = 10_000;

pub struct Sha256PasswordHasher;

impl Sha256PasswordHasher {
    fn derive(password: &str, salt: &str) -> String {
        let mut digest = format!("{salt}:{password}").into_bytes();
        for _ in 0..KDF_ITERATIONS {
            digest = Sha256::digest(&digest).to_vec();
        }
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl PasswordHasher for Sha256PasswordHasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = Uuid::new_v4().simple().to_string();
        Ok(format!("{salt}${}", Self::derive(password, &salt)))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let Some((salt, expected)) = hash.split_once('$') else {
            return Err(DomainError::Unauthorized(
                "malformed password hash".to_string(),
            ));
        };
        Ok(constant_time_eq(&Self::derive(password, salt), expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{Tenant, UserRole};

    fn user() -> User {
        let tenant = Tenant::new("acme").unwrap();
        User::new(tenant.id, "ada@acme.dev", "hash", UserRole::Admin).unwrap()
    }

    #[test]
    fn issues_and_verifies_tokens() {
        let service = JwtTokenService::new("a-long-enough-secret", 3600);
        let user = user();
        let token = service.issue(&user).unwrap();
        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.tenant_id, user.tenant_id);
        assert_eq!(claims.role, UserRole::Admin);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let issuer = JwtTokenService::new("secret-one-aaaa", 3600);
        let verifier = JwtTokenService::new("secret-two-bbbb", 3600);
        let token = issuer.issue(&user()).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_garbage_token() {
        let service = JwtTokenService::new("a-long-enough-secret", 3600);
        assert!(service.verify("not.a.token").is_err());
    }

    #[test]
    fn password_hash_verifies_and_salts() {
        let hasher = Sha256PasswordHasher;
        let h1 = hasher.hash("hunter22").unwrap();
        let h2 = hasher.hash("hunter22").unwrap();
        assert_ne!(h1, h2);
        assert!(hasher.verify("hunter22", &h1).unwrap());
        assert!(hasher.verify("hunter22", &h2).unwrap());
        assert!(!hasher.verify("wrong", &h1).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        let hasher = Sha256PasswordHasher;
        assert!(hasher.verify("x", "no-separator").is_err());
    }
}
