// src/eval/command.rs

//! External evaluator: one program run per artifact.
//!
//! The program is invoked as `<program> <function> <artifact>`. Its stdout
//! must end with a JSON object on the last non-empty line; that object is
//! the result record. Everything else on stdout and all of stderr is logged
//! at debug level.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::{AssayerError, Result};
use crate::eval::{Evaluator, ResultRecord};
use crate::types::ArtifactRef;

#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: PathBuf,
    function: String,
}

impl CommandEvaluator {
    /// Locate `program` on disk (relative paths are taken from the current
    /// directory).
    pub fn locate(program: PathBuf, function: String) -> Result<Self> {
        let program = std::path::absolute(&program).unwrap_or(program);
        if !program.is_file() {
            return Err(AssayerError::EvaluatorNotFound(format!(
                "evaluator program not found: {}",
                program.display()
            )));
        }
        Ok(Self { program, function })
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(&self, artifact: &ArtifactRef) -> Result<ResultRecord> {
        info!(
            program = %self.program.display(),
            function = %self.function,
            artifact = %artifact,
            "starting evaluator process"
        );

        let mut child = Command::new(&self.program)
            .arg(&self.function)
            .arg(artifact.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AssayerError::EvaluatorFailed(format!(
                    "spawning {}: {e}",
                    self.program.display()
                ))
            })?;

        // Always consume stderr so buffers don't fill; log at debug.
        if let Some(stderr) = child.stderr.take() {
            let artifact = artifact.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(artifact = %artifact, "evaluator stderr: {}", line);
                }
            });
        }

        let mut last_line = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                debug!(artifact = %artifact, "evaluator stdout: {}", line);
                if !line.trim().is_empty() {
                    last_line = Some(line);
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(AssayerError::EvaluatorFailed(format!(
                "{} exited with {} for {artifact}",
                self.program.display(),
                status
            )));
        }

        let line = last_line.ok_or_else(|| {
            AssayerError::EvaluatorFailed(format!(
                "{} printed no result for {artifact}",
                self.program.display()
            ))
        })?;

        match serde_json::from_str::<Value>(line.trim()) {
            Ok(Value::Object(record)) => Ok(record),
            Ok(other) => Err(AssayerError::EvaluatorFailed(format!(
                "expected a JSON object as result, got: {other}"
            ))),
            Err(e) => Err(AssayerError::EvaluatorFailed(format!(
                "last stdout line is not JSON ({e}): {line}"
            ))),
        }
    }
}
