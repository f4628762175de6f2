//! Port traits
//!
//! The seams between the domain and the outside world. Adapters implement
//! these; application services and the HTTP surface depend only on them.

pub mod completion;
pub mod event_bus;
pub mod health;
pub mod http_fetch;
pub mod job_queue;
pub mod object_store;
pub mod run_repository;
pub mod security;
pub mod site_repository;
pub mod tenant_repository;
pub mod version_repository;
pub mod workflow_repository;

pub use completion::{Completion, CompletionRequest, CompletionResponse};
pub use event_bus::{EventPublisher, PushEvent};
pub use health::HealthProbe;
pub use http_fetch::{FetchRequest, FetchResponse, HttpFetch};
pub use job_queue::JobQueue;
pub use object_store::{ObjectStore, StoredObject};
pub use run_repository::{EventRepository, RunRepository};
pub use security::{AuthClaims, PasswordHasher, TokenService};
pub use site_repository::{PageRepository, SiteRepository};
pub use tenant_repository::{TenantRepository, UserRepository};
pub use version_repository::{BuildJobRepository, SiteVersionRepository};
pub use workflow_repository::WorkflowRepository;
