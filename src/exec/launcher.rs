// src/exec/launcher.rs

//! Starting worker processes from the `watch` command.
//!
//! Each process is `assayer worker --queue <queue> --broker <path>`, so it
//! registers with the same broker file and can be stopped with
//! `assayer shutdown` like any other worker. The config file and log level
//! of the launching command are passed along.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::process::{Child, Command};
use tracing::info;

use crate::cli::LogLevel;
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    broker_path: PathBuf,
    config: Option<PathBuf>,
    log_level: Option<LogLevel>,
}

impl WorkerLauncher {
    /// Launcher that re-executes the running binary.
    pub fn current_exe(broker_path: impl Into<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe().context("locating the assayer binary")?;
        Ok(Self::new(program, broker_path))
    }

    pub fn new(program: impl Into<PathBuf>, broker_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            broker_path: broker_path.into(),
            config: None,
            log_level: None,
        }
    }

    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config = config;
        self
    }

    pub fn with_log_level(mut self, level: Option<LogLevel>) -> Self {
        self.log_level = level;
        self
    }

    pub fn broker_path(&self) -> &Path {
        &self.broker_path
    }

    /// Arguments of one worker process on `queue`.
    pub fn worker_args(&self, queue: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "worker".into(),
            "--queue".into(),
            queue.into(),
            "--broker".into(),
            self.broker_path.clone().into(),
        ];
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.clone().into());
        }
        if let Some(level) = self.log_level {
            args.push("--log-level".into());
            args.push(level.as_str().into());
        }
        args
    }

    /// Start `count` single-worker processes on `queue`.
    pub fn launch(&self, queue: &str, count: usize) -> Result<WorkerProcesses> {
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            let mut cmd = Command::new(&self.program);
            cmd.args(self.worker_args(queue))
                .stdin(Stdio::null())
                .kill_on_drop(false);

            let child = cmd
                .spawn()
                .with_context(|| format!("spawning worker process for queue {queue}"))?;
            info!(queue, pid = ?child.id(), "launched worker process");
            children.push(child);
        }

        Ok(WorkerProcesses {
            queue: queue.to_string(),
            children,
        })
    }
}

/// Worker processes started by one [`WorkerLauncher::launch`] call.
#[derive(Debug)]
pub struct WorkerProcesses {
    queue: String,
    children: Vec<Child>,
}

impl WorkerProcesses {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().filter_map(Child::id).collect()
    }
}
