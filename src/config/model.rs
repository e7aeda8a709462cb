// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::broker::sqlite::DEFAULT_BROKER_PATH;
use crate::exec::WorkerSettings;
use crate::watch::WatchConfig;

pub const DEFAULT_WATCH_QUEUE: &str = "watch";
pub const DEFAULT_EVAL_QUEUE: &str = "evaluation";
pub const DEFAULT_POLLING_INTERVAL_SECS: f64 = 5.0;
pub const DEFAULT_WATCH_WORKERS: usize = 1;
pub const DEFAULT_EVAL_WORKERS: usize = 5;

/// Configuration as read from a TOML file, before CLI overrides and
/// validation.
///
/// ```toml
/// [watch]
/// directory = "runs/exp1/checkpoints"
/// evaluator = "scripts/eval.py:evaluate"
/// regex_filter = '^.*\.pt$'
/// polling_interval = 2.5
/// watch_queue = "watch"
/// eval_queue = "evaluation"
/// eval_existing = false
///
/// [broker]
/// path = ".assayer/broker.db"
///
/// [workers]
/// watch = 1
/// eval = 5
/// ```
///
/// Every key is optional; missing ones fall back to CLI values or defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub watch: WatchSection,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub workers: WorkersSection,
}

/// `[watch]` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchSection {
    pub directory: Option<String>,
    pub evaluator: Option<String>,
    /// Regex (or `glob:<pattern>`) selecting artifacts.
    pub regex_filter: Option<String>,
    /// Seconds between ticks; fractional values are allowed.
    pub polling_interval: Option<f64>,
    pub watch_queue: Option<String>,
    pub eval_queue: Option<String>,
    pub eval_existing: Option<bool>,
}

/// `[broker]` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    /// SQLite file shared by every process of a deployment.
    pub path: Option<PathBuf>,
}

/// `[workers]` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersSection {
    pub watch: Option<usize>,
    pub eval: Option<usize>,
    /// Idle time between claims, in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Time between heartbeats, in seconds.
    pub heartbeat_interval_secs: Option<u64>,
}

impl RawConfigFile {
    /// Apply values given on the command line. CLI values win over the file.
    pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
        let w = &mut self.watch;
        merge_opt(&mut w.directory, overrides.directory);
        merge_opt(&mut w.evaluator, overrides.evaluator);
        merge_opt(&mut w.regex_filter, overrides.regex_filter);
        merge_opt(&mut w.polling_interval, overrides.polling_interval);
        merge_opt(&mut w.watch_queue, overrides.watch_queue);
        merge_opt(&mut w.eval_queue, overrides.eval_queue);
        if overrides.eval_existing {
            w.eval_existing = Some(true);
        }
        merge_opt(&mut self.broker.path, overrides.broker_path);
        merge_opt(&mut self.workers.watch, overrides.watch_workers);
        merge_opt(&mut self.workers.eval, overrides.eval_workers);
        self
    }

    pub fn broker_path(&self) -> PathBuf {
        self.broker
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BROKER_PATH))
    }

    pub fn watch_queue(&self) -> &str {
        self.watch.watch_queue.as_deref().unwrap_or(DEFAULT_WATCH_QUEUE)
    }

    pub fn eval_queue(&self) -> &str {
        self.watch.eval_queue.as_deref().unwrap_or(DEFAULT_EVAL_QUEUE)
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Values the CLI may set on top of the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub directory: Option<String>,
    pub evaluator: Option<String>,
    pub regex_filter: Option<String>,
    pub polling_interval: Option<f64>,
    pub watch_queue: Option<String>,
    pub eval_queue: Option<String>,
    pub eval_existing: bool,
    pub broker_path: Option<PathBuf>,
    pub watch_workers: Option<usize>,
    pub eval_workers: Option<usize>,
}

/// Validated settings for a `watch` run. Built with `Settings::try_from`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub watch: WatchConfig,
    pub eval_existing: bool,
    pub broker_path: PathBuf,
    pub watch_workers: usize,
    pub eval_workers: usize,
    pub worker: WorkerSettings,
}

impl Settings {
    pub fn polling_interval(&self) -> Duration {
        self.watch.polling_interval
    }
}
