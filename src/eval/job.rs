// src/eval/job.rs

use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{AssayerError, Result};
use crate::eval::{CHECKPOINT_PATH_KEY, EvaluationJob, EvaluatorRegistry, ResultRecord};

/// Execute one evaluation job.
///
/// The evaluator reference is resolved on every call. Resolution errors,
/// evaluator errors and evaluator panics all come back as `Err` for this
/// job only; nothing here can take the worker down.
pub async fn run_evaluation(
    job: &EvaluationJob,
    registry: &EvaluatorRegistry,
) -> Result<ResultRecord> {
    let evaluator = registry.resolve(&job.evaluator)?;

    info!(
        evaluator = %job.evaluator,
        artifact = %job.artifact,
        "evaluating artifact"
    );

    let artifact = job.artifact.clone();
    let handle = tokio::spawn(async move { evaluator.evaluate(&artifact).await });

    let mut record = match handle.await {
        Ok(result) => result?,
        Err(join_err) => {
            warn!(artifact = %job.artifact, "evaluator panicked");
            return Err(AssayerError::EvaluatorFailed(format!(
                "evaluator {} aborted on {}: {join_err}",
                job.evaluator, job.artifact
            )));
        }
    };

    record.insert(
        CHECKPOINT_PATH_KEY.to_string(),
        Value::from(job.artifact.as_str()),
    );
    Ok(record)
}
