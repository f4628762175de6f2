//! Durable job queue port
//!
//! At-least-once delivery; consumers convert this to effectively-once
//! persistence through the idempotency gates.

use std::time::Duration;

use async_trait::async_trait;
use atelier_core::Result;
use serde_json::Value;

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, payload: Value) -> Result<()>;

    /// Deliver no earlier than `delay` from now. DELAY nodes and retry
    /// backoff both ride on this.
    async fn enqueue_delayed(&self, queue: &str, payload: Value, delay: Duration) -> Result<()>;

    /// Blocking pop; `None` on timeout.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Value>>;

    async fn ping(&self) -> Result<()>;
}
