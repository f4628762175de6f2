//! Workflow execution service
//!
//! `WorkflowEngine` walks validated DAGs by enqueuing step jobs into the
//! shared job store; `StepWorker` drains the queue through the idempotency
//! gate. Node side effects go through the injected capability ports.

pub mod engine;
pub mod executors;
pub mod worker;

pub use engine::{EngineConfig, StepJob, WorkflowEngine, STEP_QUEUE};
pub use executors::NodeExecutor;
pub use worker::StepWorker;
