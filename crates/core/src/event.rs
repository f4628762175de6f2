//! Append-only run events
//!
//! Every engine state change writes one event; the log is the audit trail
//! and the push-bus source. Events are persisted before they are broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EventId, RunId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEventType {
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.completed")]
    StepCompleted,
    #[serde(rename = "step.failed")]
    StepFailed,
    #[serde(rename = "step.retrying")]
    StepRetrying,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "run.failed")]
    RunFailed,
    #[serde(rename = "run.cancelled")]
    RunCancelled,
}

impl RunEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run.started",
            Self::StepStarted => "step.started",
            Self::StepCompleted => "step.completed",
            Self::StepFailed => "step.failed",
            Self::StepRetrying => "step.retrying",
            Self::RunCompleted => "run.completed",
            Self::RunFailed => "run.failed",
            Self::RunCancelled => "run.cancelled",
        }
    }

    /// The push bus forwards every event type except the retry tick, which
    /// is audit-log only.
    pub fn is_pushed(&self) -> bool {
        !matches!(self, Self::StepRetrying)
    }
}

impl std::fmt::Display for RunEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: EventId,
    pub run_id: RunId,
    pub step_id: Option<StepId>,
    pub step_key: Option<String>,
    pub event_type: RunEventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn for_run(run_id: RunId, event_type: RunEventType, payload: Value) -> Self {
        Self {
            id: EventId::new(),
            run_id,
            step_id: None,
            step_key: None,
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn for_step(
        run_id: RunId,
        step_id: StepId,
        step_key: impl Into<String>,
        event_type: RunEventType,
        payload: Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            run_id,
            step_id: Some(step_id),
            step_key: Some(step_key.into()),
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_with_dotted_names() {
        let json = serde_json::to_string(&RunEventType::StepCompleted).unwrap();
        assert_eq!(json, "\"step.completed\"");
    }

    #[test]
    fn retry_tick_is_not_pushed() {
        assert!(!RunEventType::StepRetrying.is_pushed());
        assert!(RunEventType::RunCancelled.is_pushed());
    }
}
