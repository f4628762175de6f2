//! Auth REST API
//!
//! Registration creates a tenant with its admin user; both endpoints
//! return a bearer token. These are the only unauthenticated API routes.

use std::sync::Arc;

use atelier_application::AuthService;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use axum::Router;

use crate::dtos::{AuthResponseDto, Envelope, LoginRequestDto, RegisterRequestDto};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;

#[derive(Clone)]
pub struct AuthApiState {
    pub auth: Arc<AuthService>,
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequestDto,
    responses(
        (status = 201, description = "Tenant and admin user created", body = Envelope<AuthResponseDto>),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth"
)]
pub async fn register_handler(
    State(state): State<AuthApiState>,
    ApiJson(request): ApiJson<RegisterRequestDto>,
) -> ApiResult<(StatusCode, Json<Envelope<AuthResponseDto>>)> {
    let outcome = state
        .auth
        .register(&request.tenant_name, &request.email, &request.password)
        .await
        .map_err(ApiError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::new(AuthResponseDto {
            token: outcome.token,
            user: outcome.user.into(),
        })),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequestDto,
    responses(
        (status = 200, description = "Authenticated", body = Envelope<AuthResponseDto>),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(state): State<AuthApiState>,
    ApiJson(request): ApiJson<LoginRequestDto>,
) -> ApiResult<Json<Envelope<AuthResponseDto>>> {
    let outcome = state
        .auth
        .login(&request.email, &request.password)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(Envelope::new(AuthResponseDto {
        token: outcome.token,
        user: outcome.user.into(),
    })))
}

pub fn auth_routes(state: AuthApiState) -> Router {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .with_state(state)
}
