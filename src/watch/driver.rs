// src/watch/driver.rs

//! Local driver for `--inline` runs: the watch chain ticks inside the
//! current process instead of going through the watch queue.
//!
//! Evaluation jobs still go to the broker, so the eval workers are the same
//! in both modes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{SharedBroker, WorkerRecord};
use crate::errors::Result;
use crate::exec::signal::{ShutdownSignal, ShutdownTrigger};
use crate::types::WorkerId;
use crate::watch::chain::{InlineChain, inline_holder_queue};
use crate::watch::state::{WatchConfig, WatchPayload};
use crate::watch::task::{TickReport, WatchContext, run_tick};

/// Broker registration that marks an inline chain as live.
///
/// Inline ticks never sit on the watch queue, so `start_chain` finds the
/// chain through this record instead. It heartbeats like a worker, and a
/// shutdown request sent to it (e.g. by `assayer shutdown`) fires `trigger`.
/// A crashed process stops heartbeating and its hold lapses after the
/// worker TTL.
pub struct InlineHold {
    id: WorkerId,
    broker: SharedBroker,
    monitor: JoinHandle<()>,
}

impl InlineHold {
    pub async fn acquire(
        broker: SharedBroker,
        config: &WatchConfig,
        heartbeat: Duration,
        trigger: Arc<ShutdownTrigger>,
    ) -> Result<Self> {
        let id = WorkerId::generate("inline");
        let queue = inline_holder_queue(config);
        broker
            .register_worker(WorkerRecord::new(id.clone(), queue.clone()))
            .await?;
        info!(holder = %id, queue = %queue, "inline chain registered");

        let monitor = tokio::spawn({
            let broker = broker.clone();
            let id = id.clone();
            async move {
                let mut ticker = tokio::time::interval(heartbeat);
                loop {
                    ticker.tick().await;
                    match broker.heartbeat(&id, None).await {
                        Ok(true) => {
                            info!(holder = %id, "shutdown requested through broker");
                            trigger.trigger();
                            return;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(holder = %id, error = %e, "inline heartbeat failed"),
                    }
                }
            }
        });

        Ok(Self {
            id,
            broker,
            monitor,
        })
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Stop heartbeating and drop the registration.
    pub async fn release(self) -> Result<()> {
        self.monitor.abort();
        self.broker.unregister_worker(&self.id).await
    }
}

/// Drive a chain starting at `payload` until `stop` fires, the chain breaks,
/// or `max_ticks` ticks have run.
///
/// Returns the reports of every tick that ran.
pub async fn run_inline(
    ctx: &WatchContext,
    payload: WatchPayload,
    stop: &ShutdownSignal,
    max_ticks: Option<u64>,
) -> Result<Vec<TickReport>> {
    let chain = InlineChain::new();
    let mut reports = Vec::new();
    let mut next = Some(payload);

    while let Some(payload) = next.take() {
        if stop.is_triggered() {
            debug!("shutdown already requested; not starting another tick");
            break;
        }

        let report = run_tick(payload, ctx, &chain, stop).await?;
        let stopped = report.stopped;
        reports.push(report);

        if stopped {
            break;
        }
        if max_ticks.is_some_and(|max| reports.len() as u64 >= max) {
            info!(ticks = reports.len(), "tick limit reached; stopping inline chain");
            break;
        }
        next = chain.take();
    }

    Ok(reports)
}
