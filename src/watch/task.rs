// src/watch/task.rs

//! One watch tick with its side effects: scan, dispatch, rest, reschedule.
//!
//! The decisions are made by [`plan_tick`]; this module only performs the
//! IO around it. How the successor is triggered is delegated to a
//! [`ChainScheduler`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::broker::{EnqueueOptions, SharedBroker};
use crate::errors::{AssayerError, Result};
use crate::exec::signal::ShutdownSignal;
use crate::fs::FileSystem;
use crate::types::{ArtifactRef, JobId};
use crate::watch::chain::ChainScheduler;
use crate::watch::patterns::ArtifactFilter;
use crate::watch::scanner::CheckpointScanner;
use crate::watch::state::{StreamId, WatchPayload};
use crate::watch::step::{forget_undispatched, plan_tick};

/// Handles a tick needs: the broker for dispatch and a scanner.
#[derive(Debug, Clone)]
pub struct WatchContext {
    pub broker: SharedBroker,
    pub scanner: CheckpointScanner,
}

impl WatchContext {
    pub fn new(broker: SharedBroker, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            broker,
            scanner: CheckpointScanner::new(fs),
        }
    }
}

/// What one tick did; stored as the (short-lived) result of the tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub stream: StreamId,
    pub tick: u64,
    /// Evaluation jobs enqueued this tick.
    pub dispatched: Vec<JobId>,
    /// New artifacts whose evaluation job could not be enqueued; they stay
    /// out of `known` and are retried next tick.
    pub undispatched: Vec<ArtifactRef>,
    /// Size of the known set handed to the successor.
    pub known: usize,
    pub scan_error: Option<String>,
    /// Queue id of the successor tick, if it went through a queue.
    pub successor: Option<JobId>,
    /// True if shutdown cut the rest short and no successor was scheduled.
    pub stopped: bool,
}

/// Run one tick of the watch chain described by `payload`.
///
/// Errors only when the successor could not be scheduled
/// (`ChainBroken`): that ends the chain and must be surfaced.
pub async fn run_tick(
    payload: WatchPayload,
    ctx: &WatchContext,
    chain: &dyn ChainScheduler,
    stop: &ShutdownSignal,
) -> Result<TickReport> {
    let (config, state) = payload.into_parts();

    // Scan + diff.
    let scan = ArtifactFilter::parse(&config.pattern)
        .map_err(AssayerError::from)
        .and_then(|filter| ctx.scanner.scan(&config.directory, &filter));
    let mut plan = plan_tick(&state, &config, scan);

    if let Some(reason) = &plan.scan_error {
        warn!(
            stream = %state.stream,
            tick = plan.next.tick,
            directory = %config.directory,
            reason = %reason,
            "scan failed; skipping tick and keeping known artifacts"
        );
    }

    // Dispatch.
    let mut dispatched = Vec::with_capacity(plan.dispatch.len());
    let mut undispatched = Vec::new();
    for job in &plan.dispatch {
        let enqueued = match job.to_job_spec() {
            Ok(spec) => {
                ctx.broker
                    .enqueue(&config.eval_queue, spec, EnqueueOptions::discard_result())
                    .await
            }
            Err(e) => Err(e),
        };
        match enqueued {
            Ok(id) => {
                debug!(artifact = %job.artifact, job_id = %id, "dispatched evaluation");
                dispatched.push(id);
            }
            Err(e) => {
                warn!(
                    artifact = %job.artifact,
                    error = %e,
                    "failed to dispatch evaluation; will retry next tick"
                );
                undispatched.push(job.artifact.clone());
            }
        }
    }
    forget_undispatched(&mut plan.next, &undispatched);

    info!(
        stream = %state.stream,
        tick = plan.next.tick,
        new = plan.dispatch.len(),
        dispatched = dispatched.len(),
        known = plan.next.known.len(),
        "watch tick"
    );

    let mut report = TickReport {
        stream: state.stream.clone(),
        tick: plan.next.tick,
        dispatched,
        undispatched,
        known: plan.next.known.len(),
        scan_error: plan.scan_error.clone(),
        successor: None,
        stopped: false,
    };

    // Rest.
    if !stop.sleep(config.polling_interval).await {
        info!(
            stream = %state.stream,
            tick = report.tick,
            "shutdown requested while resting; watch chain ends here"
        );
        report.stopped = true;
        return Ok(report);
    }

    // Reschedule.
    let successor = WatchPayload::current(config, plan.next);
    match chain.schedule_next(successor).await {
        Ok(id) => {
            report.successor = id;
            Ok(report)
        }
        Err(e) => {
            error!(
                stream = %state.stream,
                tick = report.tick,
                error = %e,
                "failed to schedule next watch tick; watch chain is broken"
            );
            Err(AssayerError::ChainBroken {
                stream: state.stream.to_string(),
                reason: e.to_string(),
            })
        }
    }
}
