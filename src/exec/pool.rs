// src/exec/pool.rs

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::SharedBroker;
use crate::errors::{AssayerError, Result};
use crate::exec::runner::JobRunner;
use crate::exec::signal::ShutdownSignal;
use crate::exec::worker::{Worker, WorkerSettings, WorkerSummary};
use crate::types::WorkerId;

/// N workers consuming one queue inside this process.
///
/// Workers stop after their current entry when `stop` fires or when the
/// broker asks them to (see `exec::shutdown`).
pub struct WorkerPool {
    queue: String,
    ids: Vec<WorkerId>,
    handles: Vec<JoinHandle<Result<WorkerSummary>>>,
}

impl WorkerPool {
    /// Spawn `size` workers on `queue`. Each one registers itself with the
    /// broker before claiming anything.
    pub fn spawn(
        queue: impl Into<String>,
        size: usize,
        broker: SharedBroker,
        runner: Arc<dyn JobRunner>,
        settings: WorkerSettings,
        stop: ShutdownSignal,
    ) -> Self {
        let queue = queue.into();

        let mut ids = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for _ in 0..size {
            let worker = Worker::new(queue.clone(), broker.clone(), runner.clone(), settings);
            ids.push(worker.id().clone());
            handles.push(tokio::spawn(worker.run(stop.clone())));
        }
        info!(queue = %queue, size, "worker pool started");

        Self {
            queue,
            ids,
            handles,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn worker_ids(&self) -> &[WorkerId] {
        &self.ids
    }

    /// Wait for every worker to exit.
    pub async fn join(self) -> Result<Vec<WorkerSummary>> {
        let mut summaries = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(e)) => {
                    warn!(queue = %self.queue, error = %e, "worker exited with error");
                    return Err(e);
                }
                Err(join_err) => {
                    return Err(AssayerError::Other(anyhow::anyhow!(
                        "worker task on {} panicked: {join_err}",
                        self.queue
                    )));
                }
            }
        }
        Ok(summaries)
    }
}
