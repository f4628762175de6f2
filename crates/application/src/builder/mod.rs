//! Site build and serve pipeline
//!
//! Publishing snapshots a site's published pages into an immutable,
//! atomically-activated artifact version; the resolver translates
//! subdomain requests into artifact bytes with a short-lived cache.

pub mod build_worker;
pub mod publish;
pub mod renderer;
pub mod resolver;

pub use build_worker::{BuildEngine, BuildWorker, BuildPayload, BUILD_QUEUE};
pub use publish::PublishService;
pub use resolver::{Resolved, SiteResolver};
