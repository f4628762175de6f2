//! Push-bus publisher port
//!
//! The engine publishes after the persistent state transition committed;
//! the bus fans out to subscribers of the run, within the run's tenant.

use async_trait::async_trait;
use atelier_core::event::{RunEvent, RunEventType};
use atelier_core::{Result, RunId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub event_type: RunEventType,
    pub run_id: RunId,
    #[serde(skip)]
    pub tenant_id: TenantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_key: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl PushEvent {
    pub fn from_run_event(event: &RunEvent, tenant_id: TenantId) -> Self {
        Self {
            event_type: event.event_type,
            run_id: event.run_id,
            tenant_id,
            step_key: event.step_key.clone(),
            data: event.payload.clone(),
            timestamp: event.timestamp,
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: PushEvent) -> Result<()>;
}
