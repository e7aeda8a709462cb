// src/exec/worker.rs

//! Claim/execute/report loop of one worker.
//!
//! A worker owns two tasks:
//! - the claim loop, which takes the oldest entry of its queue, runs it and
//!   reports the outcome;
//! - a monitor, which heartbeats, reaps expired entries, fails entries left
//!   running by workers that disappeared, and turns either a broker-side
//!   shutdown request or the pool's local signal into the worker's stop
//!   signal.
//!
//! Once stopped, no new entry is claimed. The entry in flight always
//! finishes; a watch tick that is resting sees the signal and ends its chain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{JobOutcome, SharedBroker, WorkerRecord};
use crate::errors::Result;
use crate::exec::runner::JobRunner;
use crate::exec::signal::{ShutdownSignal, ShutdownTrigger};
use crate::types::{JobId, WorkerId};

/// Timing knobs of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Idle time between claims when the queue is empty.
    pub poll_interval: Duration,
    /// Time between heartbeats.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// What a worker did before it exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub queue: String,
    pub processed: u64,
    pub failed: u64,
}

pub struct Worker {
    id: WorkerId,
    queue: String,
    broker: SharedBroker,
    runner: Arc<dyn JobRunner>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        queue: impl Into<String>,
        broker: SharedBroker,
        runner: Arc<dyn JobRunner>,
        settings: WorkerSettings,
    ) -> Self {
        let queue = queue.into();
        Self {
            id: WorkerId::generate(&queue),
            queue,
            broker,
            runner,
            settings,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Run until `pool_stop` fires or the broker asks this worker to stop.
    pub async fn run(self, pool_stop: ShutdownSignal) -> Result<WorkerSummary> {
        self.broker
            .register_worker(WorkerRecord::new(self.id.clone(), self.queue.clone()))
            .await?;
        info!(worker = %self.id, queue = %self.queue, "worker started");

        let (trigger, stop) = ShutdownTrigger::new();
        let current: Arc<Mutex<Option<JobId>>> = Arc::new(Mutex::new(None));
        let monitor = self.spawn_monitor(trigger, pool_stop, current.clone());

        let mut summary = WorkerSummary {
            id: self.id.clone(),
            queue: self.queue.clone(),
            processed: 0,
            failed: 0,
        };

        while !stop.is_triggered() {
            let entry = match self.broker.claim(&self.queue, &self.id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    stop.sleep(self.settings.poll_interval).await;
                    continue;
                }
                Err(e) => {
                    warn!(worker = %self.id, queue = %self.queue, error = %e, "claim failed");
                    stop.sleep(self.settings.poll_interval).await;
                    continue;
                }
            };

            set_current(&current, Some(entry.id));
            debug!(worker = %self.id, job_id = %entry.id, "claimed entry");

            let outcome = self.runner.run(&entry, &stop).await;
            if matches!(outcome, JobOutcome::Failed(_)) {
                summary.failed += 1;
            }
            summary.processed += 1;

            if let Err(e) = self.broker.finish(entry.id, outcome).await {
                warn!(worker = %self.id, job_id = %entry.id, error = %e, "failed to report outcome");
            }
            set_current(&current, None);
        }

        monitor.abort();
        if let Err(e) = self.broker.unregister_worker(&self.id).await {
            warn!(worker = %self.id, error = %e, "failed to unregister worker");
        }
        info!(
            worker = %self.id,
            processed = summary.processed,
            failed = summary.failed,
            "worker stopped"
        );
        Ok(summary)
    }

    fn spawn_monitor(
        &self,
        trigger: ShutdownTrigger,
        pool_stop: ShutdownSignal,
        current: Arc<Mutex<Option<JobId>>>,
    ) -> JoinHandle<()> {
        let broker = self.broker.clone();
        let id = self.id.clone();
        let interval = self.settings.heartbeat_interval;

        tokio::spawn(async move {
            loop {
                if !pool_stop.sleep(interval).await {
                    debug!(worker = %id, "local shutdown signal");
                    trigger.trigger();
                    return;
                }

                let job = current.lock().ok().and_then(|slot| *slot);
                match broker.heartbeat(&id, job).await {
                    Ok(true) => {
                        info!(worker = %id, "shutdown requested through broker");
                        trigger.trigger();
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(worker = %id, error = %e, "heartbeat failed"),
                }

                match broker.reap_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => debug!(worker = %id, reaped = n, "reaped expired entries"),
                    Err(e) => warn!(worker = %id, error = %e, "reaping failed"),
                }

                match broker.fail_abandoned(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => warn!(worker = %id, failed = n, "failed entries of lost workers"),
                    Err(e) => warn!(worker = %id, error = %e, "abandoned-entry sweep failed"),
                }
            }
        })
    }
}

fn set_current(slot: &Mutex<Option<JobId>>, job: Option<JobId>) {
    if let Ok(mut guard) = slot.lock() {
        *guard = job;
    }
}
