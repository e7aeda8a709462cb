// src/eval/registry.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{AssayerError, Result};
use crate::eval::Evaluator;
use crate::eval::builtin::{ChecksumEvaluator, NoopEvaluator};
use crate::eval::command::CommandEvaluator;
use crate::fs::FileSystem;

/// Parsed form of an evaluator reference string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluatorRef {
    /// `path/to/program:function`
    External { program: PathBuf, function: String },
    /// `namespace.function`
    Registered { namespace: String, function: String },
}

impl EvaluatorRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if let Some((program, function)) = reference.rsplit_once(':') {
            if program.is_empty() || function.is_empty() {
                return Err(AssayerError::EvaluatorNotFound(format!(
                    "malformed evaluator reference {reference:?} (expected path:function)"
                )));
            }
            return Ok(EvaluatorRef::External {
                program: PathBuf::from(program),
                function: function.to_string(),
            });
        }

        match reference.rsplit_once('.') {
            Some((namespace, function)) if !namespace.is_empty() && !function.is_empty() => {
                Ok(EvaluatorRef::Registered {
                    namespace: namespace.to_string(),
                    function: function.to_string(),
                })
            }
            _ => Err(AssayerError::EvaluatorNotFound(format!(
                "malformed evaluator reference {reference:?} (expected namespace.function or path:function)"
            ))),
        }
    }
}

impl fmt::Display for EvaluatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluatorRef::External { program, function } => {
                write!(f, "{}:{function}", program.display())
            }
            EvaluatorRef::Registered {
                namespace,
                function,
            } => write!(f, "{namespace}.{function}"),
        }
    }
}

/// Maps reference strings to evaluators.
///
/// Registered evaluators are populated at startup; external references are
/// located on every resolution, so a program replaced on disk is picked up
/// by the next job.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: BTreeMap<String, Arc<dyn Evaluator>>,
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("registered", &self.evaluators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the evaluators shipped in this crate.
    pub fn with_builtins(fs: Arc<dyn FileSystem>) -> Self {
        let mut registry = Self::new();
        registry.register("assayer.checksum", Arc::new(ChecksumEvaluator::new(fs)));
        registry.register("assayer.noop", Arc::new(NoopEvaluator));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, evaluator: Arc<dyn Evaluator>) {
        self.evaluators.insert(name.into(), evaluator);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.evaluators.keys().map(String::as_str)
    }

    /// Resolve `reference` to a callable evaluator.
    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn Evaluator>> {
        match EvaluatorRef::parse(reference)? {
            EvaluatorRef::External { program, function } => {
                let evaluator = CommandEvaluator::locate(program, function)?;
                debug!(reference, "resolved external evaluator");
                Ok(Arc::new(evaluator))
            }
            parsed @ EvaluatorRef::Registered { .. } => {
                let key = parsed.to_string();
                self.evaluators.get(&key).cloned().ok_or_else(|| {
                    AssayerError::EvaluatorNotFound(format!(
                        "no evaluator registered as {key:?}"
                    ))
                })
            }
        }
    }
}
