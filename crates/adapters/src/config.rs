//! Application configuration
//!
//! Loaded from environment variables at startup; invalid configuration
//! fails fast with a descriptive error. The startup summary masks
//! credentials before logging.

use std::time::Duration;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::Invalid {
                name: "ENV",
                message: format!("expected development|production|test, got {other}"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Which service planes this process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    Workflow,
    Builder,
    All,
}

impl ServiceMode {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "workflow" => Ok(Self::Workflow),
            "builder" => Ok(Self::Builder),
            "all" => Ok(Self::All),
            other => Err(ConfigError::Invalid {
                name: "ATELIER_MODE",
                message: format!("expected workflow|builder|all, got {other}"),
            }),
        }
    }

    pub fn serves_workflow(&self) -> bool {
        matches!(self, Self::Workflow | Self::All)
    }

    pub fn serves_builder(&self) -> bool {
        matches!(self, Self::Builder | Self::All)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Builder => "builder",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Blank endpoint selects the filesystem store rooted at `root`.
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub force_path_style: bool,
    pub root: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub step_concurrency: usize,
    pub build_concurrency: usize,
    /// Token-bucket refill rate, steps per second per process.
    pub step_rate: u32,
    pub step_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            step_concurrency: 10,
            build_concurrency: 2,
            step_rate: 50,
            step_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub kv_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub env: Environment,
    pub log_level: String,
    /// Blank selects the deterministic mock completion.
    pub completion_api_key: String,
    pub completion_api_url: String,
    pub object_store: ObjectStoreConfig,
    pub cdn_base_url: Option<String>,
    pub mode: ServiceMode,
    pub worker: WorkerConfig,
    pub shutdown_grace: Duration,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    var(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

const LOG_LEVELS: &[&str] = &["fatal", "error", "warn", "info", "debug", "trace"];

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 8 {
            return Err(ConfigError::Invalid {
                name: "JWT_SECRET",
                message: "must be at least 8 characters".to_string(),
            });
        }

        let log_level = var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        if !LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(ConfigError::Invalid {
                name: "LOG_LEVEL",
                message: format!("expected one of {LOG_LEVELS:?}, got {log_level}"),
            });
        }

        let config = Self {
            database_url: required("DATABASE_URL")?,
            kv_url: required("KV_URL")?,
            jwt_secret,
            port: parsed("PORT", 8080)?,
            env: Environment::parse(&var("ENV").unwrap_or_else(|| "development".to_string()))?,
            log_level,
            completion_api_key: var("COMPLETION_API_KEY").unwrap_or_default(),
            completion_api_url: var("COMPLETION_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            object_store: ObjectStoreConfig {
                endpoint: var("OBJECT_STORE_ENDPOINT").unwrap_or_default(),
                region: var("OBJECT_STORE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                bucket: var("OBJECT_STORE_BUCKET").unwrap_or_else(|| "atelier-sites".to_string()),
                access_key: var("OBJECT_STORE_ACCESS_KEY").unwrap_or_default(),
                secret_key: var("OBJECT_STORE_SECRET_KEY").unwrap_or_default(),
                force_path_style: parsed("OBJECT_STORE_FORCE_PATH_STYLE", true)?,
                root: var("OBJECT_STORE_ROOT").unwrap_or_else(|| "./data/artifacts".to_string()),
            },
            cdn_base_url: var("CDN_BASE_URL"),
            mode: ServiceMode::parse(&var("ATELIER_MODE").unwrap_or_else(|| "all".to_string()))?,
            worker: WorkerConfig {
                step_concurrency: parsed("WORKER_STEP_CONCURRENCY", 10usize)?,
                build_concurrency: parsed("WORKER_BUILD_CONCURRENCY", 2usize)?,
                step_rate: parsed("WORKER_STEP_RATE", 50u32)?,
                step_timeout: Duration::from_secs(parsed("STEP_TIMEOUT_SECONDS", 300u64)?),
                max_retries: parsed("STEP_MAX_RETRIES", 3u32)?,
                retry_base_delay: Duration::from_millis(parsed("RETRY_BASE_DELAY_MS", 1000u64)?),
            },
            shutdown_grace: Duration::from_secs(parsed("SHUTDOWN_GRACE_SECONDS", 30u64)?),
        };

        Ok(config)
    }

    pub fn completion_mock_mode(&self) -> bool {
        self.completion_api_key.is_empty()
    }

    /// Log the effective configuration with credentials masked.
    pub fn log_summary(&self) {
        info!(
            database = %mask_url(&self.database_url),
            kv = %mask_url(&self.kv_url),
            port = self.port,
            env = self.env.as_str(),
            mode = self.mode.as_str(),
            object_store = %if self.object_store.endpoint.is_empty() {
                format!("fs:{}", self.object_store.root)
            } else {
                format!("{}/{}", self.object_store.endpoint, self.object_store.bucket)
            },
            completion = if self.completion_mock_mode() { "mock" } else { "live" },
            "configuration loaded"
        );
    }
}

/// Hide the credentials portion of a connection URL.
fn mask_url(url: &str) -> String {
    if let Some(pos) = url.find("://") {
        let (scheme, rest) = url.split_at(pos + 3);
        if let Some(at) = rest.rfind('@') {
            return format!("{scheme}****@{}", &rest[at + 1..]);
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_credentials_in_urls() {
        assert_eq!(
            mask_url("postgres://user:secret@db:5432/app"),
            "postgres://****@db:5432/app"
        );
        assert_eq!(mask_url("redis://cache:6379"), "redis://cache:6379");
    }

    #[test]
    fn environment_parses_known_values() {
        assert_eq!(
            Environment::parse("production").unwrap(),
            Environment::Production
        );
        assert!(Environment::parse("staging").is_err());
    }

    #[test]
    fn mode_selects_planes() {
        let all = ServiceMode::parse("all").unwrap();
        assert!(all.serves_workflow() && all.serves_builder());
        let builder = ServiceMode::parse("builder").unwrap();
        assert!(!builder.serves_workflow() && builder.serves_builder());
    }
}
