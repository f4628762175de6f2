//! Push bus
//!
//! In-process fan-out of run events to subscribed observers. One
//! broadcast channel per run, created on first subscribe; publishing to a
//! run nobody watches is free. Subscribers are tenant-checked at the
//! websocket layer before `subscribe` is called. Shutdown notifies every
//! connection to issue its going-away close.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::{Result, RunId};
use atelier_ports::{EventPublisher, PushEvent};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

pub struct PushBus {
    channels: Arc<RwLock<HashMap<RunId, broadcast::Sender<PushEvent>>>>,
    shutdown: broadcast::Sender<()>,
}

impl Default for PushBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PushBus {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    /// Subscribe to a run's events. The caller is responsible for having
    /// verified the run belongs to the subscriber's tenant.
    pub async fn subscribe(&self, run_id: RunId) -> broadcast::Receiver<PushEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// A receiver that fires when the process is shutting down.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Tell every connection to close with a going-away signal.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    async fn fan_out(&self, event: PushEvent) {
        let mut channels = self.channels.write().await;
        let run_id = event.run_id;
        if let Some(sender) = channels.get(&run_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&run_id);
                return;
            }
            let delivered = sender.send(event).unwrap_or(0);
            debug!(run_id = %run_id, subscribers = delivered, "event fanned out");
        }
    }
}

#[async_trait]
impl EventPublisher for PushBus {
    async fn publish(&self, event: PushEvent) -> Result<()> {
        self.fan_out(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::event::RunEventType;
    use atelier_core::TenantId;
    use chrono::Utc;
    use serde_json::json;

    fn event(run_id: RunId) -> PushEvent {
        PushEvent {
            event_type: RunEventType::StepCompleted,
            run_id,
            tenant_id: TenantId::new(),
            step_key: Some("a".to_string()),
            data: json!({"output": 1}),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_subscribers_of_the_run() {
        let bus = PushBus::new();
        let run = RunId::new();
        let other = RunId::new();

        let mut rx = bus.subscribe(run).await;
        let mut other_rx = bus.subscribe(other).await;

        bus.publish(event(run)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.run_id, run);
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = PushBus::new();
        bus.publish(event(RunId::new())).await.unwrap();
    }

    #[tokio::test]
    async fn stale_channels_are_pruned() {
        let bus = PushBus::new();
        let run = RunId::new();
        drop(bus.subscribe(run).await);
        bus.publish(event(run)).await.unwrap();
        assert!(bus.channels.read().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_signal_reaches_connections() {
        let bus = PushBus::new();
        let mut signal = bus.shutdown_signal();
        bus.begin_shutdown();
        assert!(signal.recv().await.is_ok());
    }

    #[test]
    fn push_event_wire_shape() {
        let e = event(RunId::new());
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "step.completed");
        assert!(json.get("tenantId").is_none());
        assert_eq!(json["stepKey"], "a");
    }
}
