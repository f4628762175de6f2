//! Redis job queue
//!
//! Immediate jobs ride a list (`RPUSH`/`BLPOP`); delayed jobs park in a
//! sorted set scored by their due time and are promoted onto the list by
//! the consumer before each blocking pop. Delivery is at-least-once; the
//! idempotency gates downstream make persistence effectively-once.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use atelier_core::health::ComponentHealth;
use atelier_core::{DomainError, Result};
use atelier_ports::{HealthProbe, JobQueue};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisJobQueue {
    manager: ConnectionManager,
}

fn map_redis_err(context: &str, e: redis::RedisError) -> DomainError {
    DomainError::Infrastructure(format!("{context}: {e}"))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn delayed_key(queue: &str) -> String {
    format!("{queue}:delayed")
}

impl RedisJobQueue {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| map_redis_err("invalid redis url", e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| map_redis_err("failed to connect to redis", e))?;
        Ok(Self { manager })
    }

    /// Move every due delayed job onto the immediate list. Each member is
    /// claimed with `ZREM` first so concurrent consumers promote it once.
    async fn promote_due(&self, queue: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let due: Vec<String> = conn
            .zrangebyscore_limit(delayed_key(queue), 0f64, now_ms() as f64, 0, 100)
            .await
            .map_err(|e| map_redis_err("read delayed jobs", e))?;

        for member in due {
            let removed: i64 = conn
                .zrem(delayed_key(queue), &member)
                .await
                .map_err(|e| map_redis_err("claim delayed job", e))?;
            if removed == 0 {
                continue;
            }
            match serde_json::from_str::<Value>(&member) {
                Ok(envelope) => {
                    let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);
                    let _: i64 = conn
                        .rpush(queue, payload.to_string())
                        .await
                        .map_err(|e| map_redis_err("promote delayed job", e))?;
                }
                Err(e) => warn!(queue, error = %e, "dropping malformed delayed job"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, queue: &str, payload: Value) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .rpush(queue, payload.to_string())
            .await
            .map_err(|e| map_redis_err("enqueue job", e))?;
        Ok(())
    }

    async fn enqueue_delayed(&self, queue: &str, payload: Value, delay: Duration) -> Result<()> {
        let due = now_ms() + delay.as_millis() as u64;
        // A unique envelope id keeps identical payloads distinct in the set.
        let member = serde_json::json!({ "id": Uuid::new_v4(), "payload": payload }).to_string();
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .zadd(delayed_key(queue), member, due as f64)
            .await
            .map_err(|e| map_redis_err("enqueue delayed job", e))?;
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Value>> {
        self.promote_due(queue).await?;

        let mut conn = self.manager.clone();
        let popped: Option<(String, String)> = conn
            .blpop(queue, timeout.as_secs_f64().max(0.1))
            .await
            .map_err(|e| map_redis_err("pop job", e))?;

        match popped {
            Some((_, raw)) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| DomainError::Infrastructure(format!("malformed job payload: {e}"))),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("ping redis", e))?;
        Ok(())
    }
}

/// `PING` probe reporting round-trip latency.
pub struct RedisHealthProbe {
    queue: RedisJobQueue,
}

impl RedisHealthProbe {
    pub fn new(queue: RedisJobQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl HealthProbe for RedisHealthProbe {
    fn component(&self) -> &str {
        "kv"
    }

    async fn check(&self) -> ComponentHealth {
        let started = std::time::Instant::now();
        match self.queue.ping().await {
            Ok(()) => ComponentHealth::healthy("kv", started.elapsed().as_millis() as u64),
            Err(e) => ComponentHealth::unhealthy("kv", e.to_string()),
        }
    }
}
