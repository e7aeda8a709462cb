#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assayer::broker::{
    Broker, EnqueueOptions, JobOutcome, JobSpec, JobStatus, MemoryBroker, QueueEntry,
    WorkerRecord,
};
use assayer::errors::{AssayerError, Result};
use assayer::eval::{Evaluator, ResultRecord};
use assayer::exec::{JobRunner, ShutdownSignal};
use assayer::types::{ArtifactRef, JobId, WorkerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Evaluator that records every artifact it sees and reports a fixed score.
#[derive(Debug, Clone, Default)]
pub struct RecordingEvaluator {
    seen: Arc<Mutex<Vec<ArtifactRef>>>,
}

impl RecordingEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<ArtifactRef> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for RecordingEvaluator {
    async fn evaluate(&self, artifact: &ArtifactRef) -> Result<ResultRecord> {
        self.seen.lock().unwrap().push(artifact.clone());
        let mut record = ResultRecord::new();
        record.insert("score".to_string(), Value::from(1.0));
        Ok(record)
    }
}

/// Evaluator that always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingEvaluator;

#[async_trait]
impl Evaluator for FailingEvaluator {
    async fn evaluate(&self, artifact: &ArtifactRef) -> Result<ResultRecord> {
        Err(AssayerError::EvaluatorFailed(format!(
            "could not load {artifact}"
        )))
    }
}

/// Evaluator that panics.
#[derive(Debug, Clone, Default)]
pub struct PanickingEvaluator;

#[async_trait]
impl Evaluator for PanickingEvaluator {
    async fn evaluate(&self, artifact: &ArtifactRef) -> Result<ResultRecord> {
        panic!("evaluator blew up on {artifact}");
    }
}

#[derive(Debug, Default)]
struct BrokerLog {
    enqueued: Vec<(String, JobSpec, EnqueueOptions)>,
    drained: Vec<String>,
    shutdowns: Vec<WorkerId>,
    failing_queues: BTreeSet<String>,
}

/// Broker double: a `MemoryBroker` that records what was asked of it and
/// can be told to reject enqueues on a queue.
#[derive(Debug, Clone, Default)]
pub struct RecordingBroker {
    inner: MemoryBroker,
    log: Arc<Mutex<BrokerLog>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryBroker {
        &self.inner
    }

    /// Make every later enqueue on `queue` fail with `BrokerUnavailable`.
    pub fn fail_enqueue_on(&self, queue: &str) {
        self.log.lock().unwrap().failing_queues.insert(queue.to_string());
    }

    pub fn allow_enqueue_on(&self, queue: &str) {
        self.log.lock().unwrap().failing_queues.remove(queue);
    }

    pub fn enqueued(&self) -> Vec<(String, JobSpec, EnqueueOptions)> {
        self.log.lock().unwrap().enqueued.clone()
    }

    pub fn enqueued_on(&self, queue: &str) -> Vec<JobSpec> {
        self.enqueued()
            .into_iter()
            .filter(|(q, _, _)| q == queue)
            .map(|(_, job, _)| job)
            .collect()
    }

    pub fn drained(&self) -> Vec<String> {
        self.log.lock().unwrap().drained.clone()
    }

    pub fn shutdowns(&self) -> Vec<WorkerId> {
        self.log.lock().unwrap().shutdowns.clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn enqueue(&self, queue: &str, job: JobSpec, options: EnqueueOptions) -> Result<JobId> {
        {
            let log = self.log.lock().unwrap();
            if log.failing_queues.contains(queue) {
                return Err(AssayerError::BrokerUnavailable(format!(
                    "enqueue on {queue} rejected"
                )));
            }
        }
        let id = self.inner.enqueue(queue, job.clone(), options).await?;
        self.log
            .lock()
            .unwrap()
            .enqueued
            .push((queue.to_string(), job, options));
        Ok(id)
    }

    async fn claim(&self, queue: &str, worker: &WorkerId) -> Result<Option<QueueEntry>> {
        self.inner.claim(queue, worker).await
    }

    async fn finish(&self, id: JobId, outcome: JobOutcome) -> Result<()> {
        self.inner.finish(id, outcome).await
    }

    async fn drain(&self, queue: &str) -> Result<usize> {
        self.log.lock().unwrap().drained.push(queue.to_string());
        self.inner.drain(queue).await
    }

    async fn list(&self, queue: &str, status: JobStatus) -> Result<Vec<QueueEntry>> {
        self.inner.list(queue, status).await
    }

    async fn job(&self, id: JobId) -> Result<Option<QueueEntry>> {
        self.inner.job(id).await
    }

    async fn register_worker(&self, record: WorkerRecord) -> Result<()> {
        self.inner.register_worker(record).await
    }

    async fn heartbeat(&self, worker: &WorkerId, current_job: Option<JobId>) -> Result<bool> {
        self.inner.heartbeat(worker, current_job).await
    }

    async fn unregister_worker(&self, worker: &WorkerId) -> Result<()> {
        self.inner.unregister_worker(worker).await
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>> {
        self.inner.list_workers().await
    }

    async fn send_shutdown(&self, worker: &WorkerId) -> Result<()> {
        self.log.lock().unwrap().shutdowns.push(worker.clone());
        self.inner.send_shutdown(worker).await
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.reap_expired(now).await
    }

    async fn fail_abandoned(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.fail_abandoned(now).await
    }
}

/// Job runner that records claimed entries and finishes them after an
/// optional delay.
#[derive(Debug, Clone, Default)]
pub struct FakeRunner {
    ran: Arc<Mutex<Vec<JobId>>>,
    delay: Duration,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn ran(&self) -> Vec<JobId> {
        self.ran.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run(&self, entry: &QueueEntry, _stop: &ShutdownSignal) -> JobOutcome {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.ran.lock().unwrap().push(entry.id);
        JobOutcome::Finished(None)
    }
}
