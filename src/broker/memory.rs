// src/broker/memory.rs

//! In-process broker.
//!
//! Clones share the same state, so a test can hand one clone to a worker
//! pool and keep another to make assertions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::broker::{
    Broker, DEFAULT_WORKER_TTL, EnqueueOptions, JobOutcome, JobSpec, JobStatus, QueueEntry,
    WORKER_LOST, WorkerRecord,
};
use crate::errors::{AssayerError, Result};
use crate::types::{JobId, WorkerId};

#[derive(Debug, Default)]
struct State {
    /// Queued ids per queue, oldest first.
    queues: HashMap<String, VecDeque<JobId>>,
    /// Every entry that has not been reaped, keyed by id.
    jobs: HashMap<JobId, QueueEntry>,
    workers: BTreeMap<WorkerId, WorkerRecord>,
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    worker_ttl: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            worker_ttl: DEFAULT_WORKER_TTL,
        }
    }

    pub fn with_worker_ttl(mut self, ttl: Duration) -> Self {
        self.worker_ttl = ttl;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AssayerError::BrokerUnavailable("memory broker lock poisoned".into()))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, queue: &str, job: JobSpec, options: EnqueueOptions) -> Result<JobId> {
        let entry = QueueEntry::new(queue, job, options, Utc::now());
        let id = entry.id;
        let mut state = self.lock()?;
        state.queues.entry(queue.to_string()).or_default().push_back(id);
        state.jobs.insert(id, entry);
        debug!(queue, job_id = %id, "enqueued job (memory)");
        Ok(id)
    }

    async fn claim(&self, queue: &str, worker: &WorkerId) -> Result<Option<QueueEntry>> {
        let mut state = self.lock()?;
        let Some(id) = state.queues.get_mut(queue).and_then(|q| q.pop_front()) else {
            return Ok(None);
        };
        let Some(entry) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        entry.status = JobStatus::Running;
        entry.started_at = Some(Utc::now());
        entry.worker = Some(worker.clone());
        Ok(Some(entry.clone()))
    }

    async fn finish(&self, id: JobId, outcome: JobOutcome) -> Result<()> {
        let mut state = self.lock()?;
        let Some(entry) = state.jobs.get_mut(&id) else {
            debug!(job_id = %id, "finish for unknown job; ignoring");
            return Ok(());
        };
        entry.ended_at = Some(Utc::now());
        match outcome {
            JobOutcome::Finished(result) => {
                entry.status = JobStatus::Finished;
                entry.result = result;
            }
            JobOutcome::Failed(error) => {
                entry.status = JobStatus::Failed;
                entry.error = Some(error);
            }
        }
        let drop_now = entry.status == JobStatus::Finished && entry.result_ttl.is_zero();
        if drop_now {
            state.jobs.remove(&id);
        }
        Ok(())
    }

    async fn drain(&self, queue: &str) -> Result<usize> {
        let mut state = self.lock()?;
        let ids: Vec<JobId> = state
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        for id in &ids {
            state.jobs.remove(id);
        }
        Ok(ids.len())
    }

    async fn list(&self, queue: &str, status: JobStatus) -> Result<Vec<QueueEntry>> {
        let state = self.lock()?;
        if status == JobStatus::Queued {
            let entries = state
                .queues
                .get(queue)
                .map(|q| q.iter().filter_map(|id| state.jobs.get(id)).cloned().collect())
                .unwrap_or_default();
            return Ok(entries);
        }
        let mut entries: Vec<QueueEntry> = state
            .jobs
            .values()
            .filter(|e| e.queue == queue && e.status == status)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.enqueued_at);
        Ok(entries)
    }

    async fn job(&self, id: JobId) -> Result<Option<QueueEntry>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn register_worker(&self, record: WorkerRecord) -> Result<()> {
        self.lock()?.workers.insert(record.id.clone(), record);
        Ok(())
    }

    async fn heartbeat(&self, worker: &WorkerId, current_job: Option<JobId>) -> Result<bool> {
        let mut state = self.lock()?;
        match state.workers.get_mut(worker) {
            Some(record) => {
                record.last_heartbeat = Utc::now();
                record.current_job = current_job;
                Ok(record.shutdown_requested)
            }
            None => Ok(true),
        }
    }

    async fn unregister_worker(&self, worker: &WorkerId) -> Result<()> {
        self.lock()?.workers.remove(worker);
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>> {
        Ok(self.lock()?.workers.values().cloned().collect())
    }

    async fn send_shutdown(&self, worker: &WorkerId) -> Result<()> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let stale = match state.workers.get_mut(worker) {
            None => {
                return Err(AssayerError::WorkerUnreachable(format!(
                    "{worker} is not registered"
                )));
            }
            Some(record) if record.is_stale(now, self.worker_ttl) => true,
            Some(record) => {
                record.shutdown_requested = true;
                false
            }
        };
        if stale {
            state.workers.remove(worker);
            return Err(AssayerError::WorkerUnreachable(format!(
                "{worker} stopped heartbeating; record removed"
            )));
        }
        Ok(())
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.lock()?;
        let before = state.jobs.len();
        state
            .jobs
            .retain(|_, entry| entry.expires_at().is_none_or(|at| at > now));
        Ok(before - state.jobs.len())
    }

    async fn fail_abandoned(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.lock()?;
        let live: HashSet<WorkerId> = state
            .workers
            .values()
            .filter(|w| !w.is_stale(now, self.worker_ttl))
            .map(|w| w.id.clone())
            .collect();

        let mut failed = 0;
        for entry in state.jobs.values_mut() {
            let owned = entry.worker.as_ref().is_some_and(|w| live.contains(w));
            if entry.status != JobStatus::Running || owned {
                continue;
            }
            entry.status = JobStatus::Failed;
            entry.ended_at = Some(now);
            entry.error = Some(WORKER_LOST.to_string());
            failed += 1;
        }
        Ok(failed)
    }
}
