// src/exec/shutdown.rs

//! Stopping a running deployment through the broker.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::broker::SharedBroker;
use crate::errors::Result;
use crate::types::WorkerId;

/// What [`ShutdownController::shutdown_all`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Pending entries removed, per queue.
    pub drained: BTreeMap<String, usize>,
    /// Workers that accepted the shutdown request.
    pub signaled: Vec<WorkerId>,
    /// Workers that could not be signaled, with the reason.
    pub unreachable: Vec<(WorkerId, String)>,
}

impl ShutdownReport {
    pub fn total_drained(&self) -> usize {
        self.drained.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownController {
    broker: SharedBroker,
    queues: Vec<String>,
}

impl ShutdownController {
    pub fn new(broker: SharedBroker, queues: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            broker,
            queues: queues.into_iter().map(Into::into).collect(),
        }
    }

    /// Drain every queue, then ask every registered worker to stop.
    ///
    /// Entries already claimed finish normally. A resting watch tick ends
    /// without a successor once its worker sees the request; a tick whose
    /// rest ends before that (within one heartbeat interval) may still
    /// enqueue one successor, which no stopped worker will claim.
    ///
    /// Worker signaling is best effort; failures are reported, not raised.
    pub async fn shutdown_all(&self) -> Result<ShutdownReport> {
        let mut report = ShutdownReport::default();

        for queue in &self.queues {
            let removed = self.broker.drain(queue).await?;
            info!(queue = %queue, removed, "drained queue");
            report.drained.insert(queue.clone(), removed);
        }

        for worker in self.broker.list_workers().await? {
            match self.broker.send_shutdown(&worker.id).await {
                Ok(()) => {
                    info!(worker = %worker.id, queue = %worker.queue, "shutdown requested");
                    report.signaled.push(worker.id);
                }
                Err(e) => {
                    warn!(worker = %worker.id, error = %e, "worker unreachable");
                    report.unreachable.push((worker.id, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}
