//! Run and Step execution records
//!
//! A `Run` is one execution attempt of a workflow; a `Step` is the per-node
//! record within it. Status transitions are monotonic and validated; the
//! timestamps follow the transitions (started on RUNNING, completed on any
//! terminal state).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, Result};
use crate::ids::{RunId, StepId, TenantId, WorkflowId};
use crate::workflow::NodeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown run status: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, to: &Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub tenant_id: TenantId,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub current_step_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(tenant_id: TenantId, workflow_id: WorkflowId, input: Value) -> Self {
        Self {
            id: RunId::new(),
            tenant_id,
            workflow_id,
            status: RunStatus::Pending,
            input,
            output: None,
            error: None,
            current_step_key: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn transition(&mut self, to: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(&to) {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                to.as_str(),
            ));
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(RunStatus::Running)
    }

    pub fn complete(&mut self, output: Option<Value>) -> Result<()> {
        self.transition(RunStatus::Completed)?;
        self.output = output;
        self.current_step_key = None;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(RunStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(DomainError::validation(format!(
                "unknown step status: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn can_transition_to(&self, to: &Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Skipped)
                // Retry re-arms a running step back to pending.
                | (Self::Running, Self::Pending)
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub run_id: RunId,
    pub step_key: String,
    pub node_type: NodeType,
    pub status: StepStatus,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    /// Stamped when a queue job for this step is enqueued. A PENDING step
    /// with no stamp was never reached and becomes SKIPPED at run
    /// completion.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(run_id: RunId, step_key: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: StepId::new(),
            run_id,
            step_key: step_key.into(),
            node_type,
            status: StepStatus::Pending,
            input: None,
            output: None,
            error: None,
            retry_count: 0,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// `runId:stepKey:retryCount`, uniquely naming one attempt.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}:{}", self.run_id, self.step_key, self.retry_count)
    }

    fn transition(&mut self, to: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(&to) {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                to.as_str(),
            ));
        }
        self.status = to;
        if to == StepStatus::Running {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn start(&mut self, input: Option<Value>) -> Result<()> {
        self.transition(StepStatus::Running)?;
        self.input = input;
        Ok(())
    }

    pub fn complete(&mut self, output: Value) -> Result<()> {
        self.transition(StepStatus::Completed)?;
        self.output = Some(output);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(StepStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn skip(&mut self) -> Result<()> {
        self.transition(StepStatus::Skipped)
    }

    /// Re-arm a failed attempt: back to PENDING with the retry counter
    /// bumped, which also rotates the idempotency key.
    pub fn arm_retry(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(StepStatus::Pending)?;
        self.retry_count += 1;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn mark_scheduled(&mut self) {
        self.scheduled_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> Step {
        Step::new(RunId::new(), "fetch", NodeType::HttpRequest)
    }

    #[test]
    fn run_full_lifecycle() {
        let mut run = Run::new(TenantId::new(), WorkflowId::new(), serde_json::json!({}));
        assert_eq!(run.status, RunStatus::Pending);
        run.start().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        run.complete(Some(serde_json::json!({"ok": true}))).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn run_cannot_complete_from_pending() {
        let mut run = Run::new(TenantId::new(), WorkflowId::new(), Value::Null);
        assert!(run.complete(None).is_err());
    }

    #[test]
    fn run_terminal_states_are_final() {
        let mut run = Run::new(TenantId::new(), WorkflowId::new(), Value::Null);
        run.start().unwrap();
        run.cancel().unwrap();
        assert!(run.start().is_err());
        assert!(run.fail("nope").is_err());
    }

    #[test]
    fn step_idempotency_key_includes_retry_counter() {
        let mut s = step();
        let first = s.idempotency_key();
        s.start(None).unwrap();
        s.arm_retry("boom").unwrap();
        let second = s.idempotency_key();
        assert_ne!(first, second);
        assert!(second.ends_with(":1"));
    }

    #[test]
    fn step_retry_rotates_back_to_pending() {
        let mut s = step();
        s.start(None).unwrap();
        s.arm_retry("upstream 500").unwrap();
        assert_eq!(s.status, StepStatus::Pending);
        assert_eq!(s.retry_count, 1);
        assert_eq!(s.error.as_deref(), Some("upstream 500"));
    }

    #[test]
    fn step_skip_from_pending_and_running() {
        let mut s = step();
        s.skip().unwrap();
        assert_eq!(s.status, StepStatus::Skipped);

        let mut s = step();
        s.start(None).unwrap();
        s.skip().unwrap();
        assert_eq!(s.status, StepStatus::Skipped);
    }

    #[test]
    fn step_cannot_restart_after_completion() {
        let mut s = step();
        s.start(None).unwrap();
        s.complete(serde_json::json!({"statusCode": 200})).unwrap();
        assert!(s.start(None).is_err());
        assert!(s.fail("late").is_err());
    }

    #[test]
    fn timestamps_follow_transitions() {
        let mut s = step();
        assert!(s.started_at.is_none());
        s.start(None).unwrap();
        assert!(s.started_at.is_some());
        assert!(s.completed_at.is_none());
        s.complete(Value::Null).unwrap();
        assert!(s.completed_at.is_some());
    }
}
