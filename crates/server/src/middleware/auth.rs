//! Bearer-token auth guard
//!
//! Every non-auth endpoint requires a valid bearer token; the guard
//! verifies it and plants `AuthContext` in the request extensions, from
//! where handlers extract it. Every downstream query carries the
//! context's tenant id.

use std::sync::Arc;

use atelier_core::{TenantId, UserId, UserRole};
use atelier_ports::TokenService;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: UserRole,
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .ok_or_else(|| ApiError::auth("missing authentication context"))
    }
}

pub async fn auth_guard(
    State(tokens): State<Arc<dyn TokenService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::auth("missing authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::auth("invalid authorization header format"))?;

    let claims = tokens.verify(token).map_err(ApiError::from)?;

    req.extensions_mut().insert(AuthContext {
        tenant_id: claims.tenant_id,
        user_id: claims.sub,
        role: claims.role,
    });

    Ok(next.run(req).await)
}
