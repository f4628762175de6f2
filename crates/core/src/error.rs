//! Error types shared across the system

use thiserror::Error;

/// Base error type for the entire system
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        /// Offending field paths, e.g. `definition.entrypoint`
        fields: Vec<String>,
    },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited")]
    RateLimited,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("build error: {0}")]
    Build(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn validation_fields(message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields,
        }
    }

    pub fn invalid_transition(from: &str, to: &str) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

pub type Result<T, E = DomainError> = std::result::Result<T, E>;
