use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{JobState, Language};

/// In-process view of job lifecycle state. The queue backend owns the
/// durable payloads and results; this store only answers "where is job X
/// right now" for the dispatch surface.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub language: Language,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
pub struct JobStore {
    records: Arc<DashMap<Uuid, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Uuid, language: Language) {
        self.records.insert(
            id,
            JobRecord {
                id,
                language,
                state: JobState::Pending,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
        );
    }

    pub fn get(&self, id: &Uuid) -> Option<JobRecord> {
        self.records.get(id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: &Uuid) {
        self.records.remove(id);
    }

    pub fn mark_running(&self, id: Uuid) {
        if let Some(mut entry) = self.records.get_mut(&id) {
            entry.state = JobState::Running;
            entry.started_at = Some(Utc::now());
        }
    }

    /// Lease lapsed before the worker finished; the job is queued again.
    pub fn mark_pending(&self, id: Uuid) {
        if let Some(mut entry) = self.records.get_mut(&id) {
            if !entry.state.is_terminal() {
                entry.state = JobState::Pending;
            }
        }
    }

    pub fn mark_finished(&self, id: Uuid, state: JobState) {
        if let Some(mut entry) = self.records.get_mut(&id) {
            entry.state = state;
            entry.finished_at = Some(Utc::now());
        }
    }

    /// Drops terminal records once they outlive the retention window.
    pub fn spawn_retention_sweep(&self, ttl: Duration) {
        let records = self.records.clone();
        let sweep_every = ttl.min(Duration::from_secs(60)).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_every);
            loop {
                tick.tick().await;
                let now = Utc::now();
                records.retain(|_, record| {
                    let Some(finished_at) = record.finished_at else {
                        return true;
                    };
                    let age = now.signed_duration_since(finished_at);
                    age.to_std().map(|age| age < ttl).unwrap_or(true)
                });
            }
        });
    }
}
