// src/exec/runner.rs

//! Callable dispatch for claimed queue entries.
//!
//! The worker loop talks to a [`JobRunner`] instead of calling the watch and
//! evaluation code directly. Production uses [`DefaultJobRunner`]; tests can
//! provide a runner that records entries or simulates failures.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::broker::{JobOutcome, QueueEntry};
use crate::errors::Result;
use crate::eval::{EVALUATE_CALLABLE, EvaluationJob, run_evaluation};
use crate::exec::WorkerContext;
use crate::exec::signal::ShutdownSignal;
use crate::watch::{QueueChain, WATCH_CALLABLE, WatchPayload, run_tick};

/// Executes one claimed entry and reports its outcome.
///
/// Implementations never return an error: anything that goes wrong with the
/// job becomes `JobOutcome::Failed` and stays local to that entry.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, entry: &QueueEntry, stop: &ShutdownSignal) -> JobOutcome;
}

/// Runner that knows the two callables this crate enqueues.
#[derive(Debug, Clone)]
pub struct DefaultJobRunner {
    ctx: WorkerContext,
}

impl DefaultJobRunner {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    async fn run_watch(&self, args: &Value, stop: &ShutdownSignal) -> Result<Value> {
        let payload = WatchPayload::from_args(args)?;
        let (config, _) = payload.clone().into_parts();

        // The successor goes back onto the queue this chain is configured
        // for, whichever queue the current entry was claimed from.
        let chain = QueueChain::new(self.ctx.broker.clone(), config.watch_queue);
        let report = run_tick(payload, &self.ctx.watch_context(), &chain, stop).await?;
        Ok(serde_json::to_value(report)?)
    }

    async fn run_evaluate(&self, args: &Value) -> Result<Value> {
        let job = EvaluationJob::from_args(args)?;
        let record = run_evaluation(&job, &self.ctx.registry).await?;
        Ok(Value::Object(record))
    }
}

#[async_trait]
impl JobRunner for DefaultJobRunner {
    async fn run(&self, entry: &QueueEntry, stop: &ShutdownSignal) -> JobOutcome {
        debug!(job_id = %entry.id, callable = %entry.job.callable, "running entry");

        let result = match entry.job.callable.as_str() {
            WATCH_CALLABLE => self.run_watch(&entry.job.args, stop).await,
            EVALUATE_CALLABLE => self.run_evaluate(&entry.job.args).await,
            other => {
                warn!(job_id = %entry.id, callable = %other, "unknown callable");
                return JobOutcome::Failed(format!("unknown callable: {other}"));
            }
        };

        match result {
            Ok(value) => JobOutcome::Finished(Some(value)),
            Err(e) => {
                error!(
                    job_id = %entry.id,
                    queue = %entry.queue,
                    callable = %entry.job.callable,
                    error = %e,
                    "job failed"
                );
                JobOutcome::Failed(e.to_string())
            }
        }
    }
}
