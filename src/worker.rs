use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::{
    config::EngineConfig,
    error::QueueError,
    metrics::MetricsRegistry,
    models::{ExecutionResult, FailureKind, JobState, Language, Outcome},
    queue::{Delivery, QueueBackend},
    sandbox::{Executor, executor_for},
    store::JobStore,
};

const BROKER_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// One worker pool per language, plus the lease reaper for that language's
/// queue. A stall in one language's executor never blocks another's pool.
pub fn spawn_worker_pools(
    config: &EngineConfig,
    queue: Arc<dyn QueueBackend>,
    store: JobStore,
    metrics: Arc<MetricsRegistry>,
) {
    for language in Language::ALL {
        let executor = executor_for(language, config);
        spawn_worker_pool(
            language,
            executor,
            config,
            queue.clone(),
            store.clone(),
            metrics.clone(),
        );
    }
}

pub fn spawn_worker_pool(
    language: Language,
    executor: Arc<dyn Executor>,
    config: &EngineConfig,
    queue: Arc<dyn QueueBackend>,
    store: JobStore,
    metrics: Arc<MetricsRegistry>,
) {
    let config = config.clone();
    for slot in 0..config.workers_per_language.max(1) {
        let executor = executor.clone();
        let queue = queue.clone();
        let store = store.clone();
        let metrics = metrics.clone();
        let config = config.clone();
        tokio::spawn(async move {
            supervise(language, slot, executor, config, queue, store, metrics).await;
        });
    }
    spawn_lease_reaper(language, config.lease_ms, queue, metrics);
}

/// Restarts a worker whose task panicked; the pool never shrinks.
async fn supervise(
    language: Language,
    slot: usize,
    executor: Arc<dyn Executor>,
    config: EngineConfig,
    queue: Arc<dyn QueueBackend>,
    store: JobStore,
    metrics: Arc<MetricsRegistry>,
) {
    loop {
        let handle = tokio::spawn(worker_loop(
            language,
            slot,
            executor.clone(),
            config.clone(),
            queue.clone(),
            store.clone(),
            metrics.clone(),
        ));
        match handle.await {
            Ok(()) => break,
            Err(err) => {
                tracing::error!(
                    language = language.as_str(),
                    slot,
                    error = %err,
                    "worker crashed, restarting"
                );
            }
        }
    }
}

async fn worker_loop(
    language: Language,
    slot: usize,
    executor: Arc<dyn Executor>,
    config: EngineConfig,
    queue: Arc<dyn QueueBackend>,
    store: JobStore,
    metrics: Arc<MetricsRegistry>,
) {
    loop {
        let delivery = match queue.dequeue(language).await {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::error!(
                    language = language.as_str(),
                    slot,
                    error = %err,
                    "dequeue failed, backing off"
                );
                tokio::time::sleep(BROKER_RETRY_BACKOFF).await;
                continue;
            }
        };

        let job_id = delivery.job.id;
        tracing::info!(
            job_id = %job_id,
            language = language.as_str(),
            slot,
            delivery = delivery.job.deliveries,
            "starting execution"
        );
        store.mark_running(job_id);
        metrics.started(language);

        let limits = config.default_limits.clone().normalized();
        let started = Instant::now();
        let run = executor.run(&delivery.job, &limits).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match run {
            Ok(outcome) => {
                let state = match &outcome {
                    Outcome::Success { .. } => JobState::Completed,
                    Outcome::Failure { kind, .. } => {
                        if matches!(kind, FailureKind::TimeoutError) {
                            metrics.timed_out(language);
                        }
                        metrics.failed(language);
                        JobState::Failed
                    }
                };
                metrics.completed(language);
                let result = ExecutionResult {
                    job_id,
                    outcome,
                    duration_ms,
                };
                settle(&*queue, &store, language, &delivery, result, state).await;
            }
            Err(err) if delivery.job.deliveries >= config.max_deliveries => {
                tracing::error!(
                    job_id = %job_id,
                    language = language.as_str(),
                    deliveries = delivery.job.deliveries,
                    error = %err,
                    "infrastructure failure, retries exhausted"
                );
                metrics.failed(language);
                let result = ExecutionResult {
                    job_id,
                    outcome: Outcome::failure(
                        FailureKind::InfrastructureError,
                        format!("{err:#}"),
                    ),
                    duration_ms,
                };
                settle(&*queue, &store, language, &delivery, result, JobState::Failed).await;
            }
            Err(err) => {
                // Leave the delivery unacked; the lease will expire and the
                // reaper makes the job visible again.
                tracing::warn!(
                    job_id = %job_id,
                    language = language.as_str(),
                    deliveries = delivery.job.deliveries,
                    error = %err,
                    "infrastructure failure, awaiting redelivery"
                );
                store.mark_pending(job_id);
            }
        }
    }
}

/// Publish then ack, in that order. A crash in between redelivers the job;
/// the duplicate publish from the retry is rejected by the queue and treated
/// as already settled, which is what gives exactly-once results on top of
/// at-least-once delivery.
async fn settle(
    queue: &dyn QueueBackend,
    store: &JobStore,
    language: Language,
    delivery: &Delivery,
    result: ExecutionResult,
    state: JobState,
) {
    let job_id = delivery.job.id;
    match queue.publish_result(&result).await {
        Ok(()) => {}
        Err(QueueError::DuplicateResult(_)) => {
            tracing::debug!(job_id = %job_id, "result already published by an earlier delivery");
        }
        Err(err) => {
            tracing::error!(
                job_id = %job_id,
                error = %err,
                "failed to publish result, leaving lease for redelivery"
            );
            store.mark_pending(job_id);
            return;
        }
    }
    store.mark_finished(job_id, state);
    if let Err(err) = queue.ack(language, delivery).await {
        tracing::warn!(
            job_id = %job_id,
            error = %err,
            "ack failed; the duplicate-publish guard settles the redelivery"
        );
    }
}

fn spawn_lease_reaper(
    language: Language,
    lease_ms: u64,
    queue: Arc<dyn QueueBackend>,
    metrics: Arc<MetricsRegistry>,
) {
    let interval = Duration::from_millis((lease_ms / 2).max(50));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            match queue.reap_expired(language).await {
                Ok(0) => {}
                Ok(requeued) => {
                    metrics.redelivered(language, requeued as u64);
                    tracing::warn!(
                        language = language.as_str(),
                        requeued,
                        "requeued jobs with expired leases"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        language = language.as_str(),
                        error = %err,
                        "lease reap failed"
                    );
                }
            }
        }
    });
}
