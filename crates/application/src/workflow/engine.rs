//! Workflow engine
//!
//! Executes validated DAGs to completion or failure without ever blocking
//! on long tasks: every step is a job in the shared queue, and workers
//! call back into `execute_step`. State transitions persist before their
//! events are broadcast.
//!
//! Traversal is predecessor-completion: completing a step enqueues its
//! successors. Each enqueue stamps the successor's `scheduled_at`, so the
//! run-completion sweep can tell an in-flight PENDING step from one that
//! was never reached (the latter becomes SKIPPED).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use atelier_core::context::StepContext;
use atelier_core::event::{RunEvent, RunEventType};
use atelier_core::run::{Run, RunStatus, Step, StepStatus};
use atelier_core::workflow::{NodeKind, WorkflowDefinition};
use atelier_core::{DomainError, Result, RunId, TenantId, WorkflowId};
use atelier_ports::{EventPublisher, EventRepository, JobQueue, PushEvent, RunRepository,
    WorkflowRepository};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::executors::NodeExecutor;

pub const STEP_QUEUE: &str = "workflow:steps";

/// One queued step execution. The idempotency key names the attempt; the
/// attempt counter lets stale deliveries fall through the claim gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepJob {
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub step_key: String,
    pub attempt: u32,
    pub idempotency_key: String,
    /// Second delivery of a DELAY node, after its pause elapsed.
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub step_timeout: Duration,
    /// Non-secret values exposed to templates as `env.NAME`.
    pub env: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            step_timeout: Duration::from_secs(300),
            env: BTreeMap::new(),
        }
    }
}

pub struct WorkflowEngine {
    workflows: Arc<dyn WorkflowRepository>,
    runs: Arc<dyn RunRepository>,
    events: Arc<dyn EventRepository>,
    queue: Arc<dyn JobQueue>,
    publisher: Arc<dyn EventPublisher>,
    executor: NodeExecutor,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        runs: Arc<dyn RunRepository>,
        events: Arc<dyn EventRepository>,
        queue: Arc<dyn JobQueue>,
        publisher: Arc<dyn EventPublisher>,
        executor: NodeExecutor,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows,
            runs,
            events,
            queue,
            publisher,
            executor,
            config,
        }
    }

    /// Validate, create the run with its step records in bulk, and enqueue
    /// the entrypoint. Returns immediately; workers do the rest.
    pub async fn start_run(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        input: Value,
    ) -> Result<Run> {
        let workflow = self
            .workflows
            .get(tenant_id, workflow_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("workflow {workflow_id}")))?;
        if !workflow.is_active {
            return Err(DomainError::validation("workflow is not active"));
        }
        workflow.definition.validate()?;

        let run = Run::new(tenant_id, workflow_id, input);
        let mut steps: Vec<Step> = workflow
            .definition
            .nodes
            .values()
            .map(|node| Step::new(run.id, &node.id, node.kind.node_type()))
            .collect();

        let entrypoint = &workflow.definition.entrypoint;
        let entry_job = {
            let entry = steps
                .iter_mut()
                .find(|s| s.step_key == *entrypoint)
                .ok_or_else(|| DomainError::validation("entrypoint step missing"))?;
            entry.mark_scheduled();
            StepJob {
                tenant_id,
                run_id: run.id,
                step_key: entry.step_key.clone(),
                attempt: 0,
                idempotency_key: entry.idempotency_key(),
                resume: false,
            }
        };

        self.runs.create_run_with_steps(&run, &steps).await?;
        self.enqueue_job(&entry_job, None).await?;

        info!(run_id = %run.id, workflow_id = %workflow_id, "run accepted");
        Ok(run)
    }

    /// Entry point for workers. Applies the idempotency gate, runs the
    /// node, then advances the graph.
    pub async fn execute_step(&self, job: &StepJob) -> Result<()> {
        let Some(mut run) = self.runs.get_run(job.tenant_id, job.run_id).await? else {
            warn!(run_id = %job.run_id, "dropping job for unknown run");
            return Ok(());
        };

        // Gate: terminal runs swallow any in-flight jobs.
        if run.is_terminal() {
            debug!(run_id = %run.id, status = %run.status, "dropping job for terminal run");
            return Ok(());
        }

        let Some(existing) = self.runs.get_step(job.run_id, &job.step_key).await? else {
            warn!(run_id = %job.run_id, step = %job.step_key, "dropping job for unknown step");
            return Ok(());
        };
        if existing.is_terminal() {
            debug!(step = %job.step_key, status = %existing.status, "dropping duplicate delivery");
            return Ok(());
        }

        let workflow = self
            .workflows
            .get(job.tenant_id, run.workflow_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("workflow {}", run.workflow_id)))?;
        let definition = &workflow.definition;

        // Resumed DELAY: the step is already RUNNING; just complete it.
        if job.resume {
            return self
                .finish_delay(&mut run, existing, definition)
                .await;
        }

        let Some(mut step) = self
            .runs
            .claim_step(job.run_id, &job.step_key, job.attempt)
            .await?
        else {
            debug!(step = %job.step_key, attempt = job.attempt, "claim lost, dropping delivery");
            return Ok(());
        };

        if run.status == RunStatus::Pending {
            run.start()?;
            self.runs.update_run(&run).await?;
            self.record(
                &run,
                RunEvent::for_run(run.id, RunEventType::RunStarted, json!({})),
            )
            .await;
        }
        run.current_step_key = Some(step.step_key.clone());
        self.runs.update_run(&run).await?;

        self.record(
            &run,
            RunEvent::for_step(
                run.id,
                step.id,
                &step.step_key,
                RunEventType::StepStarted,
                json!({ "attempt": job.attempt }),
            ),
        )
        .await;

        let node = definition
            .nodes
            .get(&step.step_key)
            .ok_or_else(|| DomainError::not_found(format!("node {}", step.step_key)))?;

        // DELAY suspends: re-enqueue the resume job and release the worker.
        if let NodeKind::Delay(config) = &node.kind {
            let delay_ms = config.clamped_ms();
            step.input = Some(json!({ "delayMs": delay_ms }));
            self.runs.update_step(&step).await?;
            let resume = StepJob {
                resume: true,
                idempotency_key: step.idempotency_key(),
                ..job.clone()
            };
            self.enqueue_job(&resume, Some(Duration::from_millis(delay_ms)))
                .await?;
            debug!(step = %step.step_key, delay_ms, "delay step parked");
            return Ok(());
        }

        let context = self.build_context(&run).await?;
        let executed = tokio::time::timeout(
            self.config.step_timeout,
            self.executor.execute(node, &context),
        )
        .await
        .unwrap_or_else(|_| {
            Err(DomainError::Timeout(format!(
                "step {} exceeded {:?}",
                step.step_key, self.config.step_timeout
            )))
        });

        match executed {
            Ok(outcome) => {
                step.input = Some(outcome.input);
                step.complete(outcome.output.clone())?;
                self.runs.update_step(&step).await?;
                self.record(
                    &run,
                    RunEvent::for_step(
                        run.id,
                        step.id,
                        &step.step_key,
                        RunEventType::StepCompleted,
                        json!({ "output": outcome.output }),
                    ),
                )
                .await;
                self.advance(&mut run, &step, definition).await
            }
            Err(error) => self.handle_step_error(&mut run, step, error).await,
        }
    }

    /// Cancel in one transaction; in-flight steps past their gate run to
    /// completion but their results land on a CANCELLED run.
    pub async fn cancel_run(&self, tenant_id: TenantId, run_id: RunId) -> Result<Run> {
        let run = self.runs.cancel_run(tenant_id, run_id).await?;
        self.record(
            &run,
            RunEvent::for_run(run.id, RunEventType::RunCancelled, json!({})),
        )
        .await;
        info!(run_id = %run.id, "run cancelled");
        Ok(run)
    }

    async fn finish_delay(
        &self,
        run: &mut Run,
        mut step: Step,
        definition: &WorkflowDefinition,
    ) -> Result<()> {
        if step.status != StepStatus::Running {
            debug!(step = %step.step_key, status = %step.status, "dropping stale delay resume");
            return Ok(());
        }
        let delay_ms = step
            .input
            .as_ref()
            .and_then(|v| v.get("delayMs"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let output = json!({ "delayed": true, "delayMs": delay_ms });
        step.complete(output.clone())?;
        self.runs.update_step(&step).await?;
        self.record(
            run,
            RunEvent::for_step(
                run.id,
                step.id,
                &step.step_key,
                RunEventType::StepCompleted,
                json!({ "output": output }),
            ),
        )
        .await;
        self.advance(run, &step, definition).await
    }

    /// Enqueue the successors of a completed step, then check whether the
    /// run is finished.
    async fn advance(
        &self,
        run: &mut Run,
        completed: &Step,
        definition: &WorkflowDefinition,
    ) -> Result<()> {
        let selected_branch = completed
            .output
            .as_ref()
            .and_then(|o| o.get("selectedBranch"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let successors = definition.successors_of(&completed.step_key, selected_branch.as_deref());

        for key in &successors {
            let Some(mut next) = self.runs.get_step(run.id, key).await? else {
                // The chosen key is absent from the run's step set.
                return self
                    .fail_run(run, format!("successor node {key} not found"))
                    .await;
            };
            if next.is_terminal() {
                continue;
            }
            if next.scheduled_at.is_none() {
                next.mark_scheduled();
                self.runs.update_step(&next).await?;
            }
            self.enqueue_job(
                &StepJob {
                    tenant_id: run.tenant_id,
                    run_id: run.id,
                    step_key: next.step_key.clone(),
                    attempt: next.retry_count,
                    idempotency_key: next.idempotency_key(),
                    resume: false,
                },
                None,
            )
            .await?;
        }

        self.check_run_completion(run).await
    }

    /// COMPLETED when nothing is RUNNING and nothing scheduled is still
    /// PENDING. Unreached PENDING steps become SKIPPED; the last completed
    /// step's output becomes the run output.
    async fn check_run_completion(&self, run: &mut Run) -> Result<()> {
        // Re-read before deciding: a concurrent cancel or failure wins,
        // and this delivery's result stays attached to the terminal run.
        if let Some(fresh) = self.runs.get_run(run.tenant_id, run.id).await? {
            if fresh.is_terminal() {
                *run = fresh;
                return Ok(());
            }
            *run = fresh;
        }

        let steps = self.runs.list_steps(run.id).await?;

        let in_flight = steps.iter().any(|s| {
            s.status == StepStatus::Running
                || (s.status == StepStatus::Pending && s.scheduled_at.is_some())
        });
        if in_flight {
            return Ok(());
        }

        for step in &steps {
            if step.status == StepStatus::Pending {
                let mut skipped = step.clone();
                skipped.skip()?;
                self.runs.update_step(&skipped).await?;
            }
        }

        let output = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .max_by_key(|s| s.completed_at)
            .and_then(|s| s.output.clone());

        run.complete(output.clone())?;
        self.runs.update_run(run).await?;
        self.record(
            run,
            RunEvent::for_run(run.id, RunEventType::RunCompleted, json!({ "output": output })),
        )
        .await;
        info!(run_id = %run.id, "run completed");
        Ok(())
    }

    /// Terminal run failure outside the per-step retry path (e.g. a
    /// condition selected a branch with no step record).
    async fn fail_run(&self, run: &mut Run, message: String) -> Result<()> {
        if let Some(fresh) = self.runs.get_run(run.tenant_id, run.id).await? {
            if fresh.is_terminal() {
                *run = fresh;
                return Ok(());
            }
            *run = fresh;
        }

        for other in self.runs.list_steps(run.id).await? {
            if other.status == StepStatus::Pending {
                let mut skipped = other.clone();
                skipped.skip()?;
                self.runs.update_step(&skipped).await?;
            }
        }
        run.fail(&message)?;
        self.runs.update_run(run).await?;
        self.record(
            run,
            RunEvent::for_run(run.id, RunEventType::RunFailed, json!({ "error": message })),
        )
        .await;
        warn!(run_id = %run.id, error = %message, "run failed");
        Ok(())
    }

    /// Retry with exponential backoff while the budget lasts; afterwards
    /// the step fails, unreached steps are skipped and the run fails.
    async fn handle_step_error(
        &self,
        run: &mut Run,
        mut step: Step,
        error: DomainError,
    ) -> Result<()> {
        let message = error.to_string();

        if step.retry_count < self.config.max_retries {
            step.arm_retry(&message)?;
            step.mark_scheduled();
            self.runs.update_step(&step).await?;

            // 1 s, 2 s, 4 s for the default base of 1 s.
            let delay = self.config.retry_base_delay * 2u32.pow(step.retry_count - 1);
            self.record(
                run,
                RunEvent::for_step(
                    run.id,
                    step.id,
                    &step.step_key,
                    RunEventType::StepRetrying,
                    json!({ "attempt": step.retry_count, "delayMs": delay.as_millis() as u64, "error": message }),
                ),
            )
            .await;
            self.enqueue_job(
                &StepJob {
                    tenant_id: run.tenant_id,
                    run_id: run.id,
                    step_key: step.step_key.clone(),
                    attempt: step.retry_count,
                    idempotency_key: step.idempotency_key(),
                    resume: false,
                },
                Some(delay),
            )
            .await?;
            warn!(step = %step.step_key, attempt = step.retry_count, error = %message, "step retrying");
            return Ok(());
        }

        step.fail(&message)?;
        self.runs.update_step(&step).await?;
        self.record(
            run,
            RunEvent::for_step(
                run.id,
                step.id,
                &step.step_key,
                RunEventType::StepFailed,
                json!({ "error": message }),
            ),
        )
        .await;

        self.fail_run(run, message).await
    }

    /// Context exposes only completed predecessors, keyed by step key.
    async fn build_context(&self, run: &Run) -> Result<StepContext> {
        let mut context = StepContext::new(run.input.clone()).with_env(self.config.env.clone());
        for step in self.runs.list_steps(run.id).await? {
            if step.status == StepStatus::Completed {
                context.record_step(
                    step.step_key.clone(),
                    step.output.clone().unwrap_or(Value::Null),
                    step.status,
                );
            }
        }
        Ok(context)
    }

    async fn enqueue_job(&self, job: &StepJob, delay: Option<Duration>) -> Result<()> {
        let payload = serde_json::to_value(job)
            .map_err(|e| DomainError::Infrastructure(format!("serialize step job: {e}")))?;
        match delay {
            Some(delay) => self.queue.enqueue_delayed(STEP_QUEUE, payload, delay).await,
            None => self.queue.enqueue(STEP_QUEUE, payload).await,
        }
    }

    /// Persist the event, then broadcast. Broadcast failures are logged
    /// and swallowed; the log is the source of truth.
    async fn record(&self, run: &Run, event: RunEvent) {
        if let Err(e) = self.events.append(&event).await {
            warn!(run_id = %run.id, error = %e, "failed to persist event");
            return;
        }
        if event.event_type.is_pushed() {
            if let Err(e) = self
                .publisher
                .publish(PushEvent::from_run_event(&event, run.tenant_id))
                .await
            {
                warn!(run_id = %run.id, error = %e, "failed to broadcast event");
            }
        }
    }
}
