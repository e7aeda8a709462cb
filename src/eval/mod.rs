// src/eval/mod.rs

//! Evaluation jobs and evaluator resolution.
//!
//! The scheduling core only knows the [`Evaluator`] interface. How a
//! reference string becomes an evaluator lives in [`registry`]:
//!
//! - `namespace.function` names an evaluator registered at startup
//!   (see [`builtin`]);
//! - `path/to/program:function` crosses the external boundary in
//!   [`command`] and runs a program per artifact.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::broker::JobSpec;
use crate::errors::{AssayerError, Result};
use crate::types::ArtifactRef;

pub mod builtin;
pub mod command;
pub mod job;
pub mod registry;

pub use job::run_evaluation;
pub use registry::{EvaluatorRef, EvaluatorRegistry};

/// Callable name of an evaluation job on the queue.
pub const EVALUATE_CALLABLE: &str = "assayer.evaluate";

/// Key added to every result record, naming the evaluated artifact.
pub const CHECKPOINT_PATH_KEY: &str = "checkpoint_path";

/// JSON object produced by one evaluation.
pub type ResultRecord = Map<String, Value>;

/// An evaluation procedure for one artifact.
///
/// Implementations do their own I/O (load the artifact, run, persist) and
/// must be safe to call concurrently for different artifacts.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, artifact: &ArtifactRef) -> Result<ResultRecord>;
}

/// One unit of evaluation work: which evaluator, which artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub evaluator: String,
    pub artifact: ArtifactRef,
}

impl EvaluationJob {
    pub fn new(evaluator: impl Into<String>, artifact: ArtifactRef) -> Self {
        Self {
            evaluator: evaluator.into(),
            artifact,
        }
    }

    pub fn to_job_spec(&self) -> Result<JobSpec> {
        Ok(JobSpec::new(EVALUATE_CALLABLE, serde_json::to_value(self)?))
    }

    pub fn from_args(args: &Value) -> Result<Self> {
        EvaluationJob::deserialize(args)
            .map_err(|e| AssayerError::InvalidPayload(format!("evaluation job: {e}")))
    }
}
