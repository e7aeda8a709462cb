// src/exec/mod.rs

//! Worker side: consuming queue entries and stopping cleanly.
//!
//! - [`runner`] maps a claimed entry's callable to the code that runs it.
//!   Tests can swap in their own [`JobRunner`].
//! - [`worker`] is the claim/execute/report loop of a single worker.
//! - [`pool`] runs N workers on one queue inside this process.
//! - [`launcher`] starts worker processes (`assayer worker ...`).
//! - [`shutdown`] drains the queues and signals every worker.
//! - [`signal`] is the local stop signal shared by a pool and its workers.

use std::sync::Arc;

use crate::broker::SharedBroker;
use crate::eval::EvaluatorRegistry;
use crate::fs::FileSystem;
use crate::watch::WatchContext;

pub mod launcher;
pub mod pool;
pub mod runner;
pub mod shutdown;
pub mod signal;
pub mod worker;

pub use launcher::{WorkerLauncher, WorkerProcesses};
pub use pool::WorkerPool;
pub use runner::{DefaultJobRunner, JobRunner};
pub use shutdown::{ShutdownController, ShutdownReport};
pub use signal::{ShutdownSignal, ShutdownTrigger};
pub use worker::{Worker, WorkerSettings, WorkerSummary};

/// Everything a worker needs to execute either kind of job.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub broker: SharedBroker,
    pub fs: Arc<dyn FileSystem>,
    pub registry: Arc<EvaluatorRegistry>,
}

impl WorkerContext {
    pub fn new(broker: SharedBroker, fs: Arc<dyn FileSystem>, registry: Arc<EvaluatorRegistry>) -> Self {
        Self {
            broker,
            fs,
            registry,
        }
    }

    pub fn watch_context(&self) -> WatchContext {
        WatchContext::new(self.broker.clone(), self.fs.clone())
    }
}
