pub mod in_memory;
pub mod redis_backend;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    config::{EngineConfig, QueueBackendKind},
    error::QueueError,
    models::{ExecutionResult, Job, Language},
};

pub use in_memory::InMemoryQueue;
pub use redis_backend::RedisQueue;

/// A job as handed to one worker under a lease.
///
/// `receipt` is the backend's handle on the leased payload; `ack` needs it to
/// settle exactly the delivery it received, not a later redelivery of the
/// same job.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: Job,
    pub receipt: String,
}

/// At-least-once job transport plus the exactly-once result channel.
///
/// Per-language isolation is part of the contract: every language gets an
/// independent pending queue, so a stalled executor for one language never
/// blocks another's deliveries.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Appends a job to its language's pending queue.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Waits until a job is available for `language` and leases it. The
    /// delivery counter inside the job is incremented before it is returned.
    /// If the lease expires without `ack`, the job becomes visible again.
    async fn dequeue(&self, language: Language) -> Result<Delivery, QueueError>;

    /// Settles a delivery; the job will not be redelivered.
    async fn ack(&self, language: Language, delivery: &Delivery) -> Result<(), QueueError>;

    /// Makes the result retrievable. Exactly once per job id; a second
    /// publish returns `QueueError::DuplicateResult`.
    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), QueueError>;

    async fn fetch_result(&self, job_id: Uuid) -> Result<Option<ExecutionResult>, QueueError>;

    /// Returns expired leases for `language` to the pending queue, yielding
    /// how many were requeued. Driven by a periodic reaper task.
    async fn reap_expired(&self, language: Language) -> Result<usize, QueueError>;
}

pub async fn backend_from_config(
    config: &EngineConfig,
) -> Result<Arc<dyn QueueBackend>, QueueError> {
    match config.queue_backend {
        QueueBackendKind::Redis => Ok(Arc::new(
            RedisQueue::connect(
                &config.redis_url,
                config.queue_key_prefix.clone(),
                config.queue_capacity,
                config.lease_ms,
                config.result_ttl_secs,
            )
            .await?,
        )),
        QueueBackendKind::Memory => Ok(Arc::new(InMemoryQueue::new(
            config.queue_capacity,
            std::time::Duration::from_millis(config.lease_ms),
            std::time::Duration::from_secs(config.result_ttl_secs),
        ))),
    }
}
