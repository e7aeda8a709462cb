// src/broker/sqlite.rs

//! Durable broker stored in a single SQLite database file.
//!
//! Every process (the `watch` launcher, each `worker`, the `shutdown`
//! command) opens its own connection to the same file. WAL mode plus a busy
//! timeout lets them share it; claims run in `BEGIN IMMEDIATE` transactions
//! so one entry is never handed to two workers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info};

use crate::broker::{
    Broker, DEFAULT_WORKER_TTL, EnqueueOptions, JobOutcome, JobSpec, JobStatus, QueueEntry,
    WORKER_LOST, WorkerRecord,
};
use crate::errors::{AssayerError, Result};
use crate::types::{JobId, WorkerId};

/// Default database location when none is configured.
pub const DEFAULT_BROKER_PATH: &str = ".assayer/broker.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    queue TEXT NOT NULL,
    callable TEXT NOT NULL,
    args TEXT NOT NULL,
    status TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    started_at INTEGER,
    ended_at INTEGER,
    worker TEXT,
    result_ttl INTEGER NOT NULL,
    failure_ttl INTEGER NOT NULL,
    result TEXT,
    error TEXT,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_jobs_queue_status ON jobs(queue, status, seq);
CREATE INDEX IF NOT EXISTS idx_jobs_expires ON jobs(expires_at);

CREATE TABLE IF NOT EXISTS workers (
    id TEXT PRIMARY KEY,
    queue TEXT NOT NULL,
    pid INTEGER NOT NULL,
    host TEXT NOT NULL,
    registered_at INTEGER NOT NULL,
    last_heartbeat INTEGER NOT NULL,
    current_job TEXT,
    shutdown_requested INTEGER NOT NULL DEFAULT 0
);
"#;

const JOB_COLUMNS: &str = "id, queue, callable, args, status, enqueued_at, started_at, ended_at, \
     worker, result_ttl, failure_ttl, result, error";

const WORKER_COLUMNS: &str =
    "id, queue, pid, host, registered_at, last_heartbeat, current_job, shutdown_requested";

#[derive(Debug, Clone)]
pub struct SqliteBroker {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    worker_ttl: Duration,
}

impl SqliteBroker {
    /// Open (creating if needed) the broker database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating broker directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| {
            AssayerError::BrokerUnavailable(format!("opening broker database {:?}: {e}", path))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = ?path, "opened sqlite broker");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            worker_ttl: DEFAULT_WORKER_TTL,
        })
    }

    pub fn with_worker_ttl(mut self, ttl: Duration) -> Self {
        self.worker_ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| {
                AssayerError::BrokerUnavailable("sqlite connection lock poisoned".into())
            })?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| AssayerError::BrokerUnavailable(format!("broker task failed: {e}")))?
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

fn parse_column<T, E: std::fmt::Display>(
    idx: usize,
    parsed: std::result::Result<T, E>,
) -> rusqlite::Result<T> {
    parsed.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let id: String = row.get(0)?;
    let args: String = row.get(3)?;
    let status: String = row.get(4)?;
    let result: Option<String> = row.get(11)?;
    let worker: Option<String> = row.get(8)?;

    Ok(QueueEntry {
        id: parse_column(0, id.parse::<JobId>())?,
        queue: row.get(1)?,
        job: JobSpec {
            callable: row.get(2)?,
            args: parse_column(3, serde_json::from_str(&args))?,
        },
        status: parse_column(4, status.parse::<JobStatus>())?,
        enqueued_at: from_millis(row.get(5)?),
        started_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
        ended_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
        worker: worker.map(WorkerId::from),
        result_ttl: Duration::from_secs(row.get::<_, i64>(9)?.max(0) as u64),
        failure_ttl: Duration::from_secs(row.get::<_, i64>(10)?.max(0) as u64),
        result: match result {
            Some(text) => Some(parse_column(11, serde_json::from_str(&text))?),
            None => None,
        },
        error: row.get(12)?,
    })
}

fn worker_from_row(row: &Row<'_>) -> rusqlite::Result<WorkerRecord> {
    let current_job: Option<String> = row.get(6)?;
    Ok(WorkerRecord {
        id: WorkerId::from(row.get::<_, String>(0)?),
        queue: row.get(1)?,
        pid: row.get(2)?,
        host: row.get(3)?,
        registered_at: from_millis(row.get(4)?),
        last_heartbeat: from_millis(row.get(5)?),
        current_job: match current_job {
            Some(id) => Some(parse_column(6, id.parse::<JobId>())?),
            None => None,
        },
        shutdown_requested: row.get::<_, i64>(7)? != 0,
    })
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn enqueue(&self, queue: &str, job: JobSpec, options: EnqueueOptions) -> Result<JobId> {
        let entry = QueueEntry::new(queue, job, options, Utc::now());
        let id = entry.id;
        let args = serde_json::to_string(&entry.job.args)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jobs (id, queue, callable, args, status, enqueued_at, result_ttl, failure_ttl)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.id.to_string(),
                    entry.queue,
                    entry.job.callable,
                    args,
                    JobStatus::Queued.as_str(),
                    millis(entry.enqueued_at),
                    ttl_secs(entry.result_ttl),
                    ttl_secs(entry.failure_ttl),
                ],
            )?;
            Ok(())
        })
        .await?;

        debug!(queue, job_id = %id, "enqueued job (sqlite)");
        Ok(id)
    }

    async fn claim(&self, queue: &str, worker: &WorkerId) -> Result<Option<QueueEntry>> {
        let queue = queue.to_string();
        let worker = worker.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let next: Option<String> = tx
                .query_row(
                    "SELECT id FROM jobs WHERE queue = ?1 AND status = ?2 ORDER BY seq LIMIT 1",
                    params![queue, JobStatus::Queued.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = next else {
                return Ok(None);
            };

            tx.execute(
                "UPDATE jobs SET status = ?1, started_at = ?2, worker = ?3 WHERE id = ?4",
                params![JobStatus::Running.as_str(), millis(Utc::now()), worker, id],
            )?;
            let entry = tx.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                entry_from_row,
            )?;
            tx.commit()?;
            Ok(Some(entry))
        })
        .await
    }

    async fn finish(&self, id: JobId, outcome: JobOutcome) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let entry = tx
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                    params![id.to_string()],
                    entry_from_row,
                )
                .optional()?;
            let Some(mut entry) = entry else {
                debug!(job_id = %id, "finish for unknown job; ignoring");
                return Ok(());
            };

            entry.ended_at = Some(Utc::now());
            match outcome {
                JobOutcome::Finished(result) => {
                    entry.status = JobStatus::Finished;
                    entry.result = result;
                }
                JobOutcome::Failed(error) => {
                    entry.status = JobStatus::Failed;
                    entry.error = Some(error);
                }
            }

            if entry.status == JobStatus::Finished && entry.result_ttl.is_zero() {
                tx.execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])?;
            } else {
                let result = entry.result.as_ref().map(serde_json::to_string).transpose()?;
                tx.execute(
                    "UPDATE jobs SET status = ?1, ended_at = ?2, result = ?3, error = ?4, expires_at = ?5
                     WHERE id = ?6",
                    params![
                        entry.status.as_str(),
                        entry.ended_at.map(millis),
                        result,
                        entry.error,
                        entry.expires_at().map(millis),
                        id.to_string(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn drain(&self, queue: &str) -> Result<usize> {
        let queue = queue.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM jobs WHERE queue = ?1 AND status = ?2",
                params![queue, JobStatus::Queued.as_str()],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn list(&self, queue: &str, status: JobStatus) -> Result<Vec<QueueEntry>> {
        let queue = queue.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE queue = ?1 AND status = ?2 ORDER BY seq"
            ))?;
            let rows = stmt.query_map(params![queue, status.as_str()], entry_from_row)?;
            let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn job(&self, id: JobId) -> Result<Option<QueueEntry>> {
        self.with_conn(move |conn| {
            let entry = conn
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                    params![id.to_string()],
                    entry_from_row,
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    async fn register_worker(&self, record: WorkerRecord) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO workers ({WORKER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    record.id.as_str(),
                    record.queue,
                    record.pid,
                    record.host,
                    millis(record.registered_at),
                    millis(record.last_heartbeat),
                    record.current_job.map(|j| j.to_string()),
                    record.shutdown_requested as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn heartbeat(&self, worker: &WorkerId, current_job: Option<JobId>) -> Result<bool> {
        let worker = worker.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE workers SET last_heartbeat = ?1, current_job = ?2 WHERE id = ?3",
                params![millis(Utc::now()), current_job.map(|j| j.to_string()), worker],
            )?;
            if updated == 0 {
                return Ok(true);
            }
            let requested: i64 = conn.query_row(
                "SELECT shutdown_requested FROM workers WHERE id = ?1",
                params![worker],
                |row| row.get(0),
            )?;
            Ok(requested != 0)
        })
        .await
    }

    async fn unregister_worker(&self, worker: &WorkerId) -> Result<()> {
        let worker = worker.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM workers WHERE id = ?1", params![worker])?;
            Ok(())
        })
        .await
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY id"))?;
            let rows = stmt.query_map([], worker_from_row)?;
            let workers = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(workers)
        })
        .await
    }

    async fn send_shutdown(&self, worker: &WorkerId) -> Result<()> {
        let worker = worker.clone();
        let ttl = self.worker_ttl;
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?1"),
                    params![worker.as_str()],
                    worker_from_row,
                )
                .optional()?;
            let Some(record) = record else {
                return Err(AssayerError::WorkerUnreachable(format!(
                    "{worker} is not registered"
                )));
            };
            if record.is_stale(Utc::now(), ttl) {
                conn.execute("DELETE FROM workers WHERE id = ?1", params![worker.as_str()])?;
                return Err(AssayerError::WorkerUnreachable(format!(
                    "{worker} stopped heartbeating; record removed"
                )));
            }
            conn.execute(
                "UPDATE workers SET shutdown_requested = 1 WHERE id = ?1",
                params![worker.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM jobs WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![millis(now)],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn fail_abandoned(&self, now: DateTime<Utc>) -> Result<usize> {
        let ttl = chrono::Duration::from_std(self.worker_ttl).unwrap_or(chrono::Duration::MAX);
        let live_since = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.with_conn(move |conn| {
            // expires_at mirrors QueueEntry::expires_at for a failure ending now.
            let failed = conn.execute(
                "UPDATE jobs
                 SET status = ?1, ended_at = ?2, error = ?3, expires_at = ?2 + failure_ttl * 1000
                 WHERE status = ?4
                   AND (worker IS NULL
                        OR worker NOT IN (SELECT id FROM workers WHERE last_heartbeat >= ?5))",
                params![
                    JobStatus::Failed.as_str(),
                    millis(now),
                    WORKER_LOST,
                    JobStatus::Running.as_str(),
                    millis(live_since),
                ],
            )?;
            Ok(failed)
        })
        .await
    }
}
