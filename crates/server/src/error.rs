//! API error envelope
//!
//! Every failure leaves the service as
//! `{"success": false, "error": {"code", "message", "details"?}}` with the
//! §7 taxonomy. Client errors log at warn, server errors at error, and
//! internal messages are hidden in production.

use atelier_core::DomainError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

/// Set once at startup; production hides internal error messages.
static HIDE_INTERNAL: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

pub fn hide_internal_errors(hide: bool) {
    HIDE_INTERNAL.store(hide, std::sync::atomic::Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "AUTH_ERROR")]
    Auth,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "RATE_LIMIT")]
    RateLimit,
    #[serde(rename = "BUILD_ERROR")]
    Build,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::Build | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Vec<String>>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Auth, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorCode::RateLimit, "rate limit exceeded")
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation { message, fields } => Self {
                code: ErrorCode::Validation,
                message,
                details: if fields.is_empty() { None } else { Some(fields) },
            },
            DomainError::InvalidStateTransition { .. } => Self {
                code: ErrorCode::Validation,
                message: e.to_string(),
                details: None,
            },
            DomainError::NotFound(what) => Self::new(ErrorCode::NotFound, what),
            DomainError::Conflict(what) => Self::new(ErrorCode::Conflict, what),
            DomainError::Unauthorized(message) => Self::new(ErrorCode::Auth, message),
            DomainError::Forbidden(message) => Self::new(ErrorCode::Forbidden, message),
            DomainError::RateLimited => Self::rate_limited(),
            DomainError::Build(message) => Self::new(ErrorCode::Build, message),
            DomainError::Timeout(message) | DomainError::Infrastructure(message) => {
                Self::new(ErrorCode::Internal, message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();

        if status.is_server_error() {
            error!(code = ?self.code, message = %self.message, "request failed");
        } else {
            warn!(code = ?self.code, message = %self.message, "request rejected");
        }

        let message = if status.is_server_error()
            && HIDE_INTERNAL.load(std::sync::atomic::Ordering::Relaxed)
        {
            "internal error".to_string()
        } else {
            self.message
        };

        let mut error = json!({ "code": self.code, "message": message });
        if let Some(details) = self.details {
            error["details"] = json!(details);
        }
        let body = json!({ "success": false, "error": error });

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_codes() {
        let e: ApiError = DomainError::Conflict("slug taken".to_string()).into();
        assert_eq!(e.code, ErrorCode::Conflict);

        let e: ApiError = DomainError::validation_fields(
            "bad definition",
            vec!["definition.entrypoint".to_string()],
        )
        .into();
        assert_eq!(e.code, ErrorCode::Validation);
        assert_eq!(e.details.unwrap(), vec!["definition.entrypoint".to_string()]);

        let e: ApiError = DomainError::Timeout("step".to_string()).into();
        assert_eq!(e.code, ErrorCode::Internal);
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ErrorCode::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Auth.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::RateLimit.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::Build.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
