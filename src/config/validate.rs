// src/config/validate.rs

use std::time::Duration;

use crate::broker::DEFAULT_WORKER_TTL;
use crate::config::model::{
    DEFAULT_EVAL_WORKERS, DEFAULT_POLLING_INTERVAL_SECS, DEFAULT_WATCH_WORKERS, RawConfigFile,
    Settings,
};
use crate::errors::{AssayerError, Result};
use crate::exec::WorkerSettings;
use crate::watch::{ArtifactFilter, DEFAULT_PATTERN, WatchConfig};

impl TryFrom<RawConfigFile> for Settings {
    type Error = AssayerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let (watch_queue, eval_queue) = validate_queue_names(&raw)?;

        let directory = required(raw.watch.directory.as_deref(), "directory")?;
        let evaluator = required(raw.watch.evaluator.as_deref(), "evaluator")?;

        let pattern = raw
            .watch
            .regex_filter
            .clone()
            .unwrap_or_else(|| DEFAULT_PATTERN.to_string());
        ArtifactFilter::parse(&pattern).map_err(|e| {
            AssayerError::ConfigError(format!("[watch].regex_filter {pattern:?} is invalid: {e:#}"))
        })?;

        let polling_interval = polling_interval(
            raw.watch
                .polling_interval
                .unwrap_or(DEFAULT_POLLING_INTERVAL_SECS),
        )?;

        let watch_workers = worker_count(raw.workers.watch, DEFAULT_WATCH_WORKERS, "watch")?;
        let eval_workers = worker_count(raw.workers.eval, DEFAULT_EVAL_WORKERS, "eval")?;
        let worker = worker_settings(&raw)?;

        Ok(Settings {
            watch: WatchConfig {
                directory,
                pattern,
                polling_interval,
                watch_queue,
                eval_queue,
                evaluator,
            },
            eval_existing: raw.watch.eval_existing.unwrap_or(false),
            broker_path: raw.broker_path(),
            watch_workers,
            eval_workers,
            worker,
        })
    }
}

/// Queue names after defaults, checked to be non-empty and distinct.
pub fn validate_queue_names(raw: &RawConfigFile) -> Result<(String, String)> {
    let watch_queue = raw.watch_queue().trim();
    let eval_queue = raw.eval_queue().trim();

    if watch_queue.is_empty() || eval_queue.is_empty() {
        return Err(AssayerError::ConfigError(
            "queue names must not be empty".to_string(),
        ));
    }
    if watch_queue == eval_queue {
        return Err(AssayerError::ConfigError(format!(
            "watch and eval queues must differ (both are {watch_queue:?})"
        )));
    }
    Ok((watch_queue.to_string(), eval_queue.to_string()))
}

/// Worker loop timings from `[workers]`, falling back to the defaults.
pub fn worker_settings(raw: &RawConfigFile) -> Result<WorkerSettings> {
    let mut settings = WorkerSettings::default();
    if let Some(ms) = raw.workers.poll_interval_ms {
        if ms == 0 {
            return Err(AssayerError::ConfigError(
                "[workers].poll_interval_ms must be >= 1".to_string(),
            ));
        }
        settings.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = raw.workers.heartbeat_interval_secs {
        if secs == 0 {
            return Err(AssayerError::ConfigError(
                "[workers].heartbeat_interval_secs must be >= 1".to_string(),
            ));
        }
        if Duration::from_secs(secs) >= DEFAULT_WORKER_TTL {
            return Err(AssayerError::ConfigError(format!(
                "[workers].heartbeat_interval_secs must be below the worker TTL of {}s",
                DEFAULT_WORKER_TTL.as_secs()
            )));
        }
        settings.heartbeat_interval = Duration::from_secs(secs);
    }
    Ok(settings)
}

fn required(value: Option<&str>, key: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AssayerError::ConfigError(format!(
            "[watch].{key} is required (or pass --{key})"
        ))),
    }
}

fn polling_interval(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(AssayerError::ConfigError(format!(
            "polling interval must be a positive number of seconds (got {secs})"
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| {
        AssayerError::ConfigError(format!("polling interval {secs} is out of range: {e}"))
    })
}

fn worker_count(value: Option<usize>, default: usize, pool: &str) -> Result<usize> {
    match value.unwrap_or(default) {
        0 => Err(AssayerError::ConfigError(format!(
            "[workers].{pool} must be >= 1 (got 0)"
        ))),
        n => Ok(n),
    }
}
