// src/broker/mod.rs

//! Durable work-queue abstraction.
//!
//! Everything that coordinates the watch chain, the eval workers and the
//! shutdown command goes through a [`Broker`]: there is no shared memory and
//! no direct process-to-process communication.
//!
//! - [`memory`] is an in-process broker (tests, `--foreground` runs).
//! - [`sqlite`] is a durable broker backed by one SQLite file that any
//!   number of processes on the same host can open concurrently.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::types::{JobId, WorkerId};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBroker;
pub use sqlite::SqliteBroker;

/// How long a finished entry (and its result) is kept by default.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(500);

/// How long a failed entry (and its error) is kept by default.
pub const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A worker whose last heartbeat is older than this is considered gone.
pub const DEFAULT_WORKER_TTL: Duration = Duration::from_secs(60);

/// Error recorded on a running entry whose worker disappeared.
pub const WORKER_LOST: &str = "worker lost";

/// Shared handle used by every component that talks to the broker.
pub type SharedBroker = Arc<dyn Broker>;

/// What to run: a callable name plus its JSON arguments.
///
/// Callable names are resolved by the worker (see `exec::runner`), never by
/// the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub callable: String,
    pub args: Value,
}

impl JobSpec {
    pub fn new(callable: impl Into<String>, args: Value) -> Self {
        Self {
            callable: callable.into(),
            args,
        }
    }
}

/// Per-enqueue options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Retention of a finished entry. Zero deletes it as soon as it finishes.
    pub result_ttl: Duration,
    /// Retention of a failed entry.
    pub failure_ttl: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            result_ttl: DEFAULT_RESULT_TTL,
            failure_ttl: DEFAULT_FAILURE_TTL,
        }
    }
}

impl EnqueueOptions {
    /// Drop the entry once it finishes successfully; failures are still kept.
    pub fn discard_result() -> Self {
        Self {
            result_ttl: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Lifecycle of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Result reported by a worker for a claimed entry.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Finished(Option<Value>),
    Failed(String),
}

/// One entry of a named queue plus its delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: JobId,
    pub queue: String,
    pub job: JobSpec,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub worker: Option<WorkerId>,
    #[serde(with = "duration_secs")]
    pub result_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub failure_ttl: Duration,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl QueueEntry {
    pub(crate) fn new(
        queue: &str,
        job: JobSpec,
        options: EnqueueOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            queue: queue.to_string(),
            job,
            status: JobStatus::Queued,
            enqueued_at: now,
            started_at: None,
            ended_at: None,
            worker: None,
            result_ttl: options.result_ttl,
            failure_ttl: options.failure_ttl,
            result: None,
            error: None,
        }
    }

    /// When this entry may be reaped, once it reached a terminal state.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ended = self.ended_at?;
        let ttl = match self.status {
            JobStatus::Finished => self.result_ttl,
            JobStatus::Failed => self.failure_ttl,
            JobStatus::Queued | JobStatus::Running => return None,
        };
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Some(ended.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

/// Registration of a live worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub queue: String,
    pub pid: u32,
    pub host: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub current_job: Option<JobId>,
    pub shutdown_requested: bool,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, queue: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            queue: queue.into(),
            pid: std::process::id(),
            host: local_hostname(),
            registered_at: now,
            last_heartbeat: now,
            current_job: None,
            shutdown_requested: false,
        }
    }

    /// True if the worker has not heartbeated within `ttl` of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_heartbeat) > ttl
    }
}

/// Best-effort name of this host, for `status` output.
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Contract over the shared, durable, multi-producer/multi-consumer queue
/// service.
///
/// Every method may fail with `AssayerError::BrokerUnavailable`. Callers
/// decide whether to retry; the watch chain never does.
#[async_trait]
pub trait Broker: Send + Sync + fmt::Debug {
    /// Append a job to `queue` and return its id.
    async fn enqueue(&self, queue: &str, job: JobSpec, options: EnqueueOptions) -> Result<JobId>;

    /// Atomically move the oldest queued entry of `queue` to `running`,
    /// assigned to `worker`.
    async fn claim(&self, queue: &str, worker: &WorkerId) -> Result<Option<QueueEntry>>;

    /// Record the outcome of a running entry and apply its retention policy.
    async fn finish(&self, id: JobId, outcome: JobOutcome) -> Result<()>;

    /// Remove every queued (not yet claimed) entry of `queue`.
    ///
    /// Running entries are untouched. Returns how many entries were removed.
    async fn drain(&self, queue: &str) -> Result<usize>;

    /// Entries of `queue` currently in `status`, oldest first.
    async fn list(&self, queue: &str, status: JobStatus) -> Result<Vec<QueueEntry>>;

    /// Pending (unclaimed) entries of `queue`, oldest first.
    async fn pending(&self, queue: &str) -> Result<Vec<QueueEntry>> {
        self.list(queue, JobStatus::Queued).await
    }

    /// Look up an entry by id. Reaped entries are gone.
    async fn job(&self, id: JobId) -> Result<Option<QueueEntry>>;

    async fn register_worker(&self, record: WorkerRecord) -> Result<()>;

    /// Refresh liveness of `worker` and return whether it should stop.
    ///
    /// A worker whose record was removed (forced shutdown) is told to stop.
    async fn heartbeat(&self, worker: &WorkerId, current_job: Option<JobId>) -> Result<bool>;

    async fn unregister_worker(&self, worker: &WorkerId) -> Result<()>;

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>>;

    /// Request cooperative termination of one worker.
    ///
    /// Fails with `WorkerUnreachable` if the worker is unknown or stale.
    async fn send_shutdown(&self, worker: &WorkerId) -> Result<()>;

    /// Delete terminal entries whose retention expired at `now`.
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Mark `running` entries as failed with [`WORKER_LOST`] when their
    /// worker is no longer registered or stopped heartbeating.
    ///
    /// Returns how many entries were failed.
    async fn fail_abandoned(&self, now: DateTime<Utc>) -> Result<usize>;
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
