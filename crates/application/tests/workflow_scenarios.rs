//! End-to-end workflow engine scenarios over the in-memory adapters.
//!
//! The queue is drained by an inline driver instead of the worker pool so
//! each scenario is deterministic; time is paused, so delayed jobs and
//! retry backoff elapse instantly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use atelier_adapters::memory::{MemoryJobQueue, MemoryRepos, RecordingPublisher};
use atelier_adapters::{MockCompletion, MockFetcher};
use atelier_application::workflow::{
    EngineConfig, NodeExecutor, StepJob, WorkflowEngine, STEP_QUEUE,
};
use atelier_core::event::RunEventType;
use atelier_core::run::{RunStatus, StepStatus};
use atelier_core::workflow::{
    ConditionConfig, DelayConfig, Edge, HttpRequestConfig, Node, NodeKind, TransformConfig,
    Workflow, WorkflowDefinition,
};
use atelier_core::{Tenant, TenantId};
use atelier_ports::{EventRepository, JobQueue, RunRepository, WorkflowRepository};
use serde_json::json;

struct Harness {
    repos: Arc<MemoryRepos>,
    queue: Arc<MemoryJobQueue>,
    publisher: Arc<RecordingPublisher>,
    fetcher: Arc<MockFetcher>,
    engine: Arc<WorkflowEngine>,
    tenant: TenantId,
}

fn harness() -> Harness {
    let repos = Arc::new(MemoryRepos::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let fetcher = Arc::new(MockFetcher::new());
    let executor = NodeExecutor::new(Arc::new(MockCompletion), fetcher.clone());
    let engine = Arc::new(WorkflowEngine::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        queue.clone(),
        publisher.clone(),
        executor,
        EngineConfig {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            step_timeout: Duration::from_secs(300),
            env: BTreeMap::new(),
        },
    ));
    let tenant = Tenant::new("acme").unwrap();
    Harness {
        repos,
        queue,
        publisher,
        fetcher,
        engine,
        tenant: tenant.id,
    }
}

impl Harness {
    async fn add_workflow(&self, definition: WorkflowDefinition) -> Workflow {
        let workflow = Workflow::new(self.tenant, "wf", definition).unwrap();
        WorkflowRepository::create(self.repos.as_ref(), &workflow)
            .await
            .unwrap();
        workflow
    }

    /// Drain the step queue to quiescence, executing jobs inline.
    async fn drive(&self) {
        loop {
            match self
                .queue
                .pop(STEP_QUEUE, Duration::from_secs(30))
                .await
                .unwrap()
            {
                Some(payload) => {
                    let job: StepJob = serde_json::from_value(payload).unwrap();
                    self.engine.execute_step(&job).await.unwrap();
                }
                None => break,
            }
        }
    }

    async fn event_types(&self, run_id: atelier_core::RunId) -> Vec<RunEventType> {
        EventRepository::list(self.repos.as_ref(), run_id, None, Default::default())
            .await
            .unwrap()
            .data
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

fn transform(id: &str, template: serde_json::Map<String, serde_json::Value>, next: &[&str]) -> Node {
    Node {
        id: id.to_string(),
        kind: NodeKind::Transform(TransformConfig { template }),
        next: next.iter().map(|s| s.to_string()).collect(),
    }
}

fn simple_transform(id: &str, next: &[&str]) -> Node {
    let mut template = serde_json::Map::new();
    template.insert("at".to_string(), json!(id));
    transform(id, template, next)
}

fn definition(nodes: Vec<Node>, edges: Vec<(&str, &str)>, entrypoint: &str) -> WorkflowDefinition {
    WorkflowDefinition {
        metadata: atelier_core::workflow::DefinitionMetadata {
            name: "scenario".to_string(),
            version: 1,
            description: None,
        },
        nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        edges: edges
            .into_iter()
            .map(|(from, to)| Edge {
                from: from.to_string(),
                to: to.to_string(),
            })
            .collect(),
        entrypoint: entrypoint.to_string(),
    }
}

// Linear chain of transforms: steps complete in order, run completes.
#[tokio::test(start_paused = true)]
async fn linear_workflow_completes_in_order() {
    let h = harness();
    let workflow = h
        .add_workflow(definition(
            vec![
                simple_transform("a", &["b"]),
                simple_transform("b", &["c"]),
                simple_transform("c", &[]),
            ],
            vec![("a", "b"), ("b", "c")],
            "a",
        ))
        .await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({"x": 1}))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    h.drive().await;

    let run = h.repos.get_run(h.tenant, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output, Some(json!({"at": "c"})));

    let steps = h.repos.list_steps(run.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));

    // Completion order follows the chain.
    let mut ordered: Vec<_> = steps.clone();
    ordered.sort_by_key(|s| s.completed_at);
    let keys: Vec<&str> = ordered.iter().map(|s| s.step_key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);

    let events = h.event_types(run.id).await;
    assert_eq!(
        events.iter().filter(|t| **t == RunEventType::RunStarted).count(),
        1
    );
    assert_eq!(
        events.iter().filter(|t| **t == RunEventType::StepStarted).count(),
        3
    );
    assert_eq!(
        events
            .iter()
            .filter(|t| **t == RunEventType::StepCompleted)
            .count(),
        3
    );
    assert_eq!(
        events
            .iter()
            .filter(|t| **t == RunEventType::RunCompleted)
            .count(),
        1
    );
    // Events are totally ordered: run.started first, run.completed last.
    assert_eq!(events.first(), Some(&RunEventType::RunStarted));
    assert_eq!(events.last(), Some(&RunEventType::RunCompleted));
}

// Condition branch: only the selected branch runs; the other stays
// un-enqueued and is skipped at completion.
#[tokio::test(start_paused = true)]
async fn condition_branch_skips_untaken_path() {
    let h = harness();
    let check = Node {
        id: "check".to_string(),
        kind: NodeKind::Condition(ConditionConfig {
            expression: "input.value > 10".to_string(),
            true_branch: Some("hi".to_string()),
            false_branch: Some("lo".to_string()),
        }),
        next: vec!["hi".to_string(), "lo".to_string()],
    };
    let workflow = h
        .add_workflow(definition(
            vec![check, simple_transform("hi", &[]), simple_transform("lo", &[])],
            vec![("check", "hi"), ("check", "lo")],
            "check",
        ))
        .await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({"value": 20}))
        .await
        .unwrap();
    h.drive().await;

    let run = h.repos.get_run(h.tenant, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let steps = h.repos.list_steps(run.id).await.unwrap();
    let by_key = |k: &str| steps.iter().find(|s| s.step_key == k).unwrap();
    assert_eq!(by_key("check").status, StepStatus::Completed);
    assert_eq!(by_key("hi").status, StepStatus::Completed);
    assert_eq!(by_key("lo").status, StepStatus::Skipped);
    assert!(by_key("lo").scheduled_at.is_none(), "lo was never enqueued");
    assert_eq!(
        by_key("check").output.as_ref().unwrap()["selectedBranch"],
        json!("hi")
    );
}

// Retry then fail: an always-erroring HTTP node is attempted four
// times with 1 s, 2 s, 4 s backoff, then the step and run fail.
#[tokio::test(start_paused = true)]
async fn failing_http_node_retries_then_fails_run() {
    let h = harness();
    for _ in 0..4 {
        h.fetcher.script_error("connection refused").await;
    }
    let node = Node {
        id: "fetch".to_string(),
        kind: NodeKind::HttpRequest(HttpRequestConfig {
            url: "http://unreachable.invalid/".to_string(),
            method: "GET".to_string(),
            headers: None,
            body: None,
        }),
        next: vec![],
    };
    let workflow = h.add_workflow(definition(vec![node], vec![], "fetch")).await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({}))
        .await
        .unwrap();
    h.drive().await;

    let run = h.repos.get_run(h.tenant, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("connection refused"));

    let step = h.repos.get_step(run.id, "fetch").await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.retry_count, 3);

    // Four actual attempts hit the fetcher.
    assert_eq!(h.fetcher.recorded().await.len(), 4);

    // The retry ticks record the exponential schedule.
    let events = EventRepository::list(h.repos.as_ref(), run.id, None, Default::default())
        .await
        .unwrap()
        .data;
    let delays: Vec<u64> = events
        .iter()
        .filter(|e| e.event_type == RunEventType::StepRetrying)
        .map(|e| e.payload["delayMs"].as_u64().unwrap())
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000]);

    // Retry ticks stay in the audit log; the bus only saw started/failed.
    let pushed = h.publisher.events().await;
    assert!(pushed
        .iter()
        .all(|e| e.event_type != RunEventType::StepRetrying));
    assert!(pushed
        .iter()
        .any(|e| e.event_type == RunEventType::RunFailed));
}

// Non-2xx is not an error: the status lands in the output and the run
// completes.
#[tokio::test(start_paused = true)]
async fn http_5xx_is_a_successful_step() {
    let h = harness();
    h.fetcher.script_status(503, json!({"error": "down"})).await;
    let node = Node {
        id: "fetch".to_string(),
        kind: NodeKind::HttpRequest(HttpRequestConfig {
            url: "http://api.invalid/health".to_string(),
            method: "GET".to_string(),
            headers: None,
            body: None,
        }),
        next: vec![],
    };
    let workflow = h.add_workflow(definition(vec![node], vec![], "fetch")).await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({}))
        .await
        .unwrap();
    h.drive().await;

    let run = h.repos.get_run(h.tenant, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output.unwrap()["statusCode"], json!(503));
}

// Parallel fan-out: both successors of the entrypoint run.
#[tokio::test(start_paused = true)]
async fn parallel_branches_both_execute() {
    let h = harness();
    let workflow = h
        .add_workflow(definition(
            vec![
                simple_transform("a", &["left", "right"]),
                simple_transform("left", &[]),
                simple_transform("right", &[]),
            ],
            vec![("a", "left"), ("a", "right")],
            "a",
        ))
        .await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({}))
        .await
        .unwrap();
    h.drive().await;

    let steps = h.repos.list_steps(run.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    let run = h.repos.get_run(h.tenant, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

// Cancel mid-run: the parked DELAY step is skipped, the resume
// delivery is swallowed, and a run.cancelled event is emitted.
#[tokio::test(start_paused = true)]
async fn cancel_during_delay_skips_and_stops() {
    let h = harness();
    let delay = Node {
        id: "wait".to_string(),
        kind: NodeKind::Delay(DelayConfig { delay_ms: 10_000 }),
        next: vec!["after".to_string()],
    };
    let workflow = h
        .add_workflow(definition(
            vec![delay, simple_transform("after", &[])],
            vec![("wait", "after")],
            "wait",
        ))
        .await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({}))
        .await
        .unwrap();

    // First delivery parks the delay and schedules the resume.
    let payload = h
        .queue
        .pop(STEP_QUEUE, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("entry job");
    let job: StepJob = serde_json::from_value(payload).unwrap();
    h.engine.execute_step(&job).await.unwrap();

    let step = h.repos.get_step(run.id, "wait").await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Running);

    // Cancel before the delay elapses.
    let cancelled = h.engine.cancel_run(h.tenant, run.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    // The resume delivery arrives later and is dropped by the gate.
    h.drive().await;

    let run = h.repos.get_run(h.tenant, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    let steps = h.repos.list_steps(run.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Skipped));

    let events = h.event_types(run.id).await;
    assert!(events.contains(&RunEventType::RunCancelled));
    assert!(!events.contains(&RunEventType::RunCompleted));
}

// Delays beyond the cap are clamped to 30 s.
#[tokio::test(start_paused = true)]
async fn oversized_delay_is_clamped() {
    let h = harness();
    let delay = Node {
        id: "wait".to_string(),
        kind: NodeKind::Delay(DelayConfig { delay_ms: 120_000 }),
        next: vec![],
    };
    let workflow = h.add_workflow(definition(vec![delay], vec![], "wait")).await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({}))
        .await
        .unwrap();
    h.drive().await;

    let run = h.repos.get_run(h.tenant, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output.unwrap(), json!({"delayed": true, "delayMs": 30_000}));
}

// Idempotency: replaying a delivered job produces no second transition
// and no duplicate events.
#[tokio::test(start_paused = true)]
async fn duplicate_delivery_is_dropped() {
    let h = harness();
    let workflow = h
        .add_workflow(definition(vec![simple_transform("only", &[])], vec![], "only"))
        .await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({}))
        .await
        .unwrap();
    h.drive().await;

    let events_before = h.event_types(run.id).await.len();
    let replay = StepJob {
        tenant_id: h.tenant,
        run_id: run.id,
        step_key: "only".to_string(),
        attempt: 0,
        idempotency_key: format!("{}:only:0", run.id),
        resume: false,
    };
    h.engine.execute_step(&replay).await.unwrap();
    h.engine.execute_step(&replay).await.unwrap();

    assert_eq!(h.event_types(run.id).await.len(), events_before);
    let step = h.repos.get_step(run.id, "only").await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Completed);
}

// Tenant isolation: a foreign tenant can neither read nor cancel the
// run.
#[tokio::test(start_paused = true)]
async fn runs_are_tenant_scoped() {
    let h = harness();
    let workflow = h
        .add_workflow(definition(vec![simple_transform("only", &[])], vec![], "only"))
        .await;
    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({}))
        .await
        .unwrap();

    let stranger = TenantId::new();
    assert!(h.repos.get_run(stranger, run.id).await.unwrap().is_none());
    assert!(h.engine.cancel_run(stranger, run.id).await.is_err());
}

// Executing a soft-deleted workflow is rejected.
#[tokio::test(start_paused = true)]
async fn inactive_workflow_cannot_start() {
    let h = harness();
    let mut workflow = h
        .add_workflow(definition(vec![simple_transform("only", &[])], vec![], "only"))
        .await;
    workflow.deactivate();
    WorkflowRepository::update(h.repos.as_ref(), &workflow)
        .await
        .unwrap();

    let err = h
        .engine
        .start_run(h.tenant, workflow.id, json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not active"));
}

// Templates flow predecessor outputs into later steps.
#[tokio::test(start_paused = true)]
async fn transform_reads_predecessor_output() {
    let h = harness();
    let mut first = serde_json::Map::new();
    first.insert("greeting".to_string(), json!("hello {{input.name}}"));
    let mut second = serde_json::Map::new();
    second.insert(
        "echo".to_string(),
        json!("{{steps[\"a\"].output.greeting}}!"),
    );
    let workflow = h
        .add_workflow(definition(
            vec![transform("a", first, &["b"]), transform("b", second, &[])],
            vec![("a", "b")],
            "a",
        ))
        .await;

    let run = h
        .engine
        .start_run(h.tenant, workflow.id, json!({"name": "ada"}))
        .await
        .unwrap();
    h.drive().await;

    let run = h.repos.get_run(h.tenant, run.id).await.unwrap().unwrap();
    assert_eq!(run.output.unwrap()["echo"], json!("hello ada!"));
}
