// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::ConfigOverrides;

/// Command-line arguments for `assayer`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "assayer",
    version,
    about = "Watch a directory for new checkpoints and evaluate each one exactly once.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a config file (TOML).
    ///
    /// Default: `Assayer.toml` in the current directory, if it exists.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ASSAYER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start a watch chain on a directory plus its worker pools.
    Watch(WatchArgs),
    /// Run workers on one queue until they are shut down.
    Worker(WorkerArgs),
    /// Drain both queues and ask every worker to stop.
    Shutdown(ShutdownArgs),
    /// Show queue depths and workers, or one job.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Directory to watch (direct children only).
    #[arg(long, value_name = "DIR")]
    pub directory: Option<String>,

    /// Evaluator reference: `path/to/program:function` or `namespace.function`.
    #[arg(long, value_name = "REF")]
    pub evaluator: Option<String>,

    /// Regex (or `glob:<pattern>`) selecting artifacts.
    #[arg(long, value_name = "PATTERN")]
    pub regex_filter: Option<String>,

    /// Seconds between scans.
    #[arg(long, value_name = "SECS")]
    pub polling_interval: Option<f64>,

    #[arg(long, value_name = "NAME")]
    pub watch_queue: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub eval_queue: Option<String>,

    #[arg(long, value_name = "N")]
    pub num_watch_workers: Option<usize>,

    #[arg(long, value_name = "N")]
    pub num_eval_workers: Option<usize>,

    /// Also evaluate artifacts already present at startup.
    #[arg(long)]
    pub eval_existing: bool,

    /// Broker database file.
    #[arg(long, value_name = "PATH")]
    pub broker: Option<PathBuf>,

    /// Host the worker pools in this process instead of launching worker
    /// processes; runs until Ctrl-C or `assayer shutdown`.
    #[arg(long)]
    pub foreground: bool,

    /// Tick the watch chain in this process instead of through the watch
    /// queue. Implies `--foreground`. The chain registers with the broker so
    /// a second `watch` on the same stream is refused while it runs.
    #[arg(long)]
    pub inline: bool,

    /// Start even if this directory already has a live watch chain.
    #[arg(long)]
    pub force: bool,
}

impl WatchArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            directory: self.directory.clone(),
            evaluator: self.evaluator.clone(),
            regex_filter: self.regex_filter.clone(),
            polling_interval: self.polling_interval,
            watch_queue: self.watch_queue.clone(),
            eval_queue: self.eval_queue.clone(),
            eval_existing: self.eval_existing,
            broker_path: self.broker.clone(),
            watch_workers: self.num_watch_workers,
            eval_workers: self.num_eval_workers,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Queue to consume.
    #[arg(long, value_name = "NAME")]
    pub queue: String,

    /// Number of workers in this process.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub concurrency: usize,

    #[arg(long, value_name = "PATH")]
    pub broker: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct ShutdownArgs {
    #[arg(long, value_name = "NAME")]
    pub watch_queue: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub eval_queue: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub broker: Option<PathBuf>,
}

impl ShutdownArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            watch_queue: self.watch_queue.clone(),
            eval_queue: self.eval_queue.clone(),
            broker_path: self.broker.clone(),
            ..ConfigOverrides::default()
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Show a single job instead of the overview.
    #[arg(value_name = "JOB_ID")]
    pub job_id: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub broker: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
