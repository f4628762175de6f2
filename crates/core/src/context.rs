//! Step execution context
//!
//! The read-only view a node executor receives: the run input, the outputs
//! of completed predecessor steps, and non-secret environment values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::run::StepStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub output: Value,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    pub input: Value,
    /// Populated only for completed predecessors.
    pub steps: BTreeMap<String, StepSnapshot>,
    pub env: BTreeMap<String, String>,
}

impl StepContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            steps: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn record_step(&mut self, key: impl Into<String>, output: Value, status: StepStatus) {
        self.steps.insert(key.into(), StepSnapshot { output, status });
    }
}
