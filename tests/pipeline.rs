use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use uuid::Uuid;

use coderunner::{
    config::EngineConfig,
    dispatch::{Dispatcher, ResultResponse},
    error::QueueError,
    metrics::MetricsRegistry,
    models::{ExecutionResult, FailureKind, Job, JobState, Language, Outcome, SandboxLimits},
    queue::{InMemoryQueue, QueueBackend},
    sandbox::Executor,
    store::JobStore,
    worker::spawn_worker_pool,
};

/// Resolves every job with its own source echoed back, so tests can verify
/// that concurrent jobs never receive each other's output.
struct SourceEchoExecutor;

#[async_trait]
impl Executor for SourceEchoExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn run(&self, job: &Job, _limits: &SandboxLimits) -> anyhow::Result<Outcome> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Outcome::Success {
            stdout: format!("{}\n", job.source),
        })
    }
}

/// Simulates a missing interpreter binary on every delivery.
struct BrokenToolExecutor;

#[async_trait]
impl Executor for BrokenToolExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn run(&self, _job: &Job, _limits: &SandboxLimits) -> anyhow::Result<Outcome> {
        anyhow::bail!("interpreter binary not found")
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<dyn QueueBackend>,
}

fn harness(executor: Arc<dyn Executor>, lease_ms: u64, max_deliveries: u32) -> Harness {
    let mut config = EngineConfig::from_env();
    config.workers_per_language = 2;
    config.lease_ms = lease_ms;
    config.max_deliveries = max_deliveries;

    let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new(
        config.queue_capacity,
        Duration::from_millis(config.lease_ms),
        Duration::from_secs(config.result_ttl_secs),
    ));
    let store = JobStore::new();
    let metrics = Arc::new(MetricsRegistry::new());
    spawn_worker_pool(
        Language::Python,
        executor,
        &config,
        queue.clone(),
        store.clone(),
        metrics.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), store, metrics));
    Harness { dispatcher, queue }
}

async fn await_result(dispatcher: &Dispatcher, id: Uuid, within: Duration) -> ResultResponse {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let response = dispatcher.result(id).await.expect("job known");
        if response.result.is_some() {
            return response;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no result within {within:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn submitted_job_resolves_to_exactly_one_result() {
    let harness = harness(Arc::new(SourceEchoExecutor), 5000, 3);

    let id = harness
        .dispatcher
        .submit(Language::Python, "print(2+2)".to_string())
        .await
        .unwrap();

    let response = await_result(&harness.dispatcher, id, Duration::from_secs(2)).await;
    assert_eq!(response.state, JobState::Completed);
    let result = response.result.expect("result present");
    assert_eq!(
        result.outcome,
        Outcome::Success {
            stdout: "print(2+2)\n".to_string()
        }
    );

    // The result channel is exactly-once per job id.
    let duplicate = harness
        .queue
        .publish_result(&ExecutionResult {
            job_id: id,
            outcome: Outcome::Success {
                stdout: String::new(),
            },
            duration_ms: 0,
        })
        .await;
    assert!(matches!(duplicate, Err(QueueError::DuplicateResult(_))));
}

#[tokio::test]
async fn concurrent_jobs_keep_their_own_output() {
    let harness = harness(Arc::new(SourceEchoExecutor), 5000, 3);

    let mut ids = Vec::new();
    for n in 0..8 {
        let source = format!("job-{n}");
        let id = harness
            .dispatcher
            .submit(Language::Python, source.clone())
            .await
            .unwrap();
        ids.push((id, source));
    }

    for (id, source) in ids {
        let response = await_result(&harness.dispatcher, id, Duration::from_secs(2)).await;
        let result = response.result.unwrap();
        assert_eq!(result.job_id, id);
        assert_eq!(
            result.outcome,
            Outcome::Success {
                stdout: format!("{source}\n")
            }
        );
    }
}

#[tokio::test]
async fn infrastructure_failures_are_redelivered_then_fail_permanently() {
    let harness = harness(Arc::new(BrokenToolExecutor), 50, 2);

    let id = harness
        .dispatcher
        .submit(Language::Python, "print(1)".to_string())
        .await
        .unwrap();

    let response = await_result(&harness.dispatcher, id, Duration::from_secs(5)).await;
    assert_eq!(response.state, JobState::Failed);
    match response.result.unwrap().outcome {
        Outcome::Failure { kind, message } => {
            assert_eq!(kind, FailureKind::InfrastructureError);
            assert!(message.contains("interpreter binary not found"));
        }
        other => panic!("expected infrastructure failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_job_reports_not_found() {
    let harness = harness(Arc::new(SourceEchoExecutor), 5000, 3);
    let missing = harness.dispatcher.result(Uuid::new_v4()).await;
    assert!(missing.is_err());
}
