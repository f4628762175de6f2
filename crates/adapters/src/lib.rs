//! Infrastructure adapters
//!
//! Implementations of the port traits: PostgreSQL repositories, the Redis
//! job queue, object stores, token/password services, outbound HTTP and
//! completion clients, environment configuration, and in-memory doubles
//! used by tests and single-process development mode.

pub mod completion;
pub mod config;
pub mod http_fetch;
pub mod memory;
pub mod object_store;
pub mod postgres;
pub mod redis_queue;
pub mod security;

pub use completion::{HttpCompletion, MockCompletion};
pub use config::{AppConfig, ConfigError, Environment};
pub use http_fetch::{MockFetcher, ReqwestFetcher};
pub use object_store::{FsObjectStore, HttpObjectStore, MemoryObjectStore};
pub use redis_queue::RedisJobQueue;
pub use security::{JwtTokenService, Sha256PasswordHasher};
