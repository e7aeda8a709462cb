// src/watch/chain.rs

//! Starting a watch chain and triggering its next tick.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::broker::{
    DEFAULT_WORKER_TTL, EnqueueOptions, JobStatus, QueueEntry, SharedBroker, WorkerRecord,
};
use crate::errors::{AssayerError, Result};
use crate::eval::EvaluationJob;
use crate::types::{JobId, KnownSet};
use crate::watch::patterns::ArtifactFilter;
use crate::watch::state::{WATCH_CALLABLE, WatchConfig, WatchPayload, WatchState};
use crate::watch::task::WatchContext;

/// Decides how the tick after the current one gets triggered.
#[async_trait]
pub trait ChainScheduler: Send + Sync {
    /// Arrange for `payload` to run as the next tick.
    ///
    /// Returns the queue id when the successor went through a queue.
    async fn schedule_next(&self, payload: WatchPayload) -> Result<Option<JobId>>;
}

/// Self-enqueue: the successor becomes a new entry on the watch queue.
///
/// Results of watch ticks are never retained, so a long-running chain does
/// not grow the broker.
#[derive(Debug, Clone)]
pub struct QueueChain {
    broker: SharedBroker,
    queue: String,
}

impl QueueChain {
    pub fn new(broker: SharedBroker, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl ChainScheduler for QueueChain {
    async fn schedule_next(&self, payload: WatchPayload) -> Result<Option<JobId>> {
        let spec = payload.to_job_spec()?;
        let id = self
            .broker
            .enqueue(&self.queue, spec, EnqueueOptions::discard_result())
            .await?;
        Ok(Some(id))
    }
}

/// In-process trigger: the successor is kept in a slot for a local driver
/// loop (see `watch::driver`) instead of going through the broker.
#[derive(Debug, Default)]
pub struct InlineChain {
    next: Mutex<Option<WatchPayload>>,
}

impl InlineChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the payload scheduled by the last tick, if any.
    pub fn take(&self) -> Option<WatchPayload> {
        self.next.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl ChainScheduler for InlineChain {
    async fn schedule_next(&self, payload: WatchPayload) -> Result<Option<JobId>> {
        let mut slot = self
            .next
            .lock()
            .map_err(|_| AssayerError::Other(anyhow::anyhow!("inline chain slot poisoned")))?;
        *slot = Some(payload);
        Ok(None)
    }
}

/// How a new chain is seeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainOptions {
    /// Evaluate artifacts already in the directory before the chain starts.
    pub eval_existing: bool,
    /// Start even if the stream already has a queued or running tick.
    pub force: bool,
}

/// Result of [`start_chain`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStart {
    pub payload: WatchPayload,
    /// Queue id of the first tick (`None` for inline chains).
    pub watch_job: Option<JobId>,
    /// Evaluation jobs dispatched for pre-existing artifacts.
    pub seeded: Vec<JobId>,
}

/// Initial chain state from the directory contents at startup.
///
/// `known` always starts as the current contents; with `eval_existing` the
/// same artifacts are also returned as jobs to dispatch up front.
pub fn seed(config: &WatchConfig, current: KnownSet, eval_existing: bool) -> (WatchState, Vec<EvaluationJob>) {
    let jobs = if eval_existing {
        current
            .iter()
            .map(|artifact| EvaluationJob::new(config.evaluator.clone(), artifact.clone()))
            .collect()
    } else {
        Vec::new()
    };
    (WatchState::new(config.stream_id(), current), jobs)
}

/// Watch-queue entries (queued or running) that belong to `config`'s stream.
///
/// Running entries whose worker disappeared are failed first, so a chain
/// whose worker crashed does not count as active.
pub async fn active_chain_entries(
    broker: &SharedBroker,
    config: &WatchConfig,
) -> Result<Vec<QueueEntry>> {
    let lost = broker.fail_abandoned(Utc::now()).await?;
    if lost > 0 {
        warn!(lost, "failed entries left running by lost workers");
    }

    let stream = config.stream_id();
    let mut entries = broker.list(&config.watch_queue, JobStatus::Queued).await?;
    entries.extend(broker.list(&config.watch_queue, JobStatus::Running).await?);

    Ok(entries
        .into_iter()
        .filter(|entry| entry.job.callable == WATCH_CALLABLE)
        .filter(|entry| {
            WatchPayload::from_args(&entry.job.args)
                .map(|payload| payload.stream() == &stream)
                .unwrap_or(false)
        })
        .collect())
}

/// Pseudo-queue under which an inline chain for `config` registers itself.
pub fn inline_holder_queue(config: &WatchConfig) -> String {
    format!("{}@inline/{}", config.watch_queue, config.stream_id())
}

/// Live registrations of inline chains for `config`'s stream.
pub async fn inline_holders(broker: &SharedBroker, config: &WatchConfig) -> Result<Vec<WorkerRecord>> {
    let queue = inline_holder_queue(config);
    let now = Utc::now();
    Ok(broker
        .list_workers()
        .await?
        .into_iter()
        .filter(|w| w.queue == queue && !w.is_stale(now, DEFAULT_WORKER_TTL))
        .collect())
}

/// Scan the directory, dispatch pre-existing artifacts if asked, and hand
/// the first tick to `chain`.
///
/// Refuses with `ChainAlreadyActive` if the stream already has a live tick
/// on the watch queue or a live inline chain, unless `options.force` is set.
pub async fn start_chain(
    ctx: &WatchContext,
    config: WatchConfig,
    options: ChainOptions,
    chain: &dyn ChainScheduler,
) -> Result<ChainStart> {
    let stream = config.stream_id();

    let active = active_chain_entries(&ctx.broker, &config).await?.len()
        + inline_holders(&ctx.broker, &config).await?.len();
    if active > 0 {
        if !options.force {
            return Err(AssayerError::ChainAlreadyActive(stream.to_string()));
        }
        warn!(
            stream = %stream,
            active,
            "starting a second chain for a stream that already has one (forced)"
        );
    }

    let filter = ArtifactFilter::parse(&config.pattern)?;
    let current = ctx.scanner.scan(&config.directory, &filter)?;
    info!(
        stream = %stream,
        directory = %config.directory,
        existing = current.len(),
        eval_existing = options.eval_existing,
        "seeding watch chain"
    );

    let (state, jobs) = seed(&config, current, options.eval_existing);

    let mut seeded = Vec::with_capacity(jobs.len());
    for job in jobs {
        let id = ctx
            .broker
            .enqueue(&config.eval_queue, job.to_job_spec()?, EnqueueOptions::discard_result())
            .await?;
        seeded.push(id);
    }

    let payload = WatchPayload::current(config, state);
    let watch_job = chain.schedule_next(payload.clone()).await?;
    info!(stream = %stream, watch_job = ?watch_job, "watch chain started");

    Ok(ChainStart {
        payload,
        watch_job,
        seeded,
    })
}
