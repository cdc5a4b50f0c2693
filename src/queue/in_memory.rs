use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::{
    error::QueueError,
    models::{ExecutionResult, Job, Language},
    queue::{Delivery, QueueBackend},
};

struct Leased {
    job: Job,
    receipt: String,
    deadline: Instant,
}

#[derive(Default)]
struct LangQueue {
    pending: Mutex<VecDeque<Job>>,
    inflight: Mutex<HashMap<Uuid, Leased>>,
    notify: Notify,
}

/// Single-process queue backend. Used for tests and deployments that do not
/// need durability across restarts; the semantics (leases, redelivery,
/// exactly-once results) match the Redis backend.
pub struct InMemoryQueue {
    queues: HashMap<Language, LangQueue>,
    results: DashMap<Uuid, (ExecutionResult, Instant)>,
    capacity: usize,
    lease: Duration,
    result_ttl: Duration,
}

impl InMemoryQueue {
    pub fn new(capacity: usize, lease: Duration, result_ttl: Duration) -> Self {
        let queues = Language::ALL
            .into_iter()
            .map(|language| (language, LangQueue::default()))
            .collect();
        Self {
            queues,
            results: DashMap::new(),
            capacity,
            lease,
            result_ttl,
        }
    }

    fn queue(&self, language: Language) -> &LangQueue {
        // Every language is seeded in `new`.
        &self.queues[&language]
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let queue = self.queue(job.language);
        let mut pending = queue.pending.lock().await;
        if pending.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        pending.push_back(job);
        drop(pending);
        queue.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, language: Language) -> Result<Delivery, QueueError> {
        let queue = self.queue(language);
        loop {
            let notified = queue.notify.notified();
            let leased = {
                let mut pending = queue.pending.lock().await;
                pending.pop_front()
            };
            if let Some(mut job) = leased {
                job.deliveries += 1;
                let receipt = format!("{}:{}", job.id, job.deliveries);
                queue.inflight.lock().await.insert(
                    job.id,
                    Leased {
                        job: job.clone(),
                        receipt: receipt.clone(),
                        deadline: Instant::now() + self.lease,
                    },
                );
                return Ok(Delivery { job, receipt });
            }
            notified.await;
        }
    }

    async fn ack(&self, language: Language, delivery: &Delivery) -> Result<(), QueueError> {
        let queue = self.queue(language);
        let mut inflight = queue.inflight.lock().await;
        // An ack for an expired lease must not release the redelivery's
        // newer lease; only the matching receipt settles it.
        if inflight
            .get(&delivery.job.id)
            .is_some_and(|leased| leased.receipt == delivery.receipt)
        {
            inflight.remove(&delivery.job.id);
        }
        Ok(())
    }

    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), QueueError> {
        use dashmap::mapref::entry::Entry;
        match self.results.entry(result.job_id) {
            Entry::Occupied(_) => Err(QueueError::DuplicateResult(result.job_id)),
            Entry::Vacant(slot) => {
                slot.insert((result.clone(), Instant::now() + self.result_ttl));
                Ok(())
            }
        }
    }

    async fn fetch_result(&self, job_id: Uuid) -> Result<Option<ExecutionResult>, QueueError> {
        if let Some(entry) = self.results.get(&job_id) {
            let (result, expires) = entry.value();
            if Instant::now() < *expires {
                return Ok(Some(result.clone()));
            }
        } else {
            return Ok(None);
        }
        self.results.remove(&job_id);
        Ok(None)
    }

    async fn reap_expired(&self, language: Language) -> Result<usize, QueueError> {
        let queue = self.queue(language);
        let now = Instant::now();
        let mut inflight = queue.inflight.lock().await;
        let expired: Vec<Uuid> = inflight
            .iter()
            .filter(|(_, leased)| leased.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let mut requeued = 0;
        if expired.is_empty() {
            return Ok(0);
        }
        let mut pending = queue.pending.lock().await;
        for id in expired {
            if let Some(leased) = inflight.remove(&id) {
                pending.push_back(leased.job);
                requeued += 1;
            }
        }
        drop(pending);
        drop(inflight);
        for _ in 0..requeued {
            queue.notify.notify_one();
        }
        Ok(requeued)
    }
}
