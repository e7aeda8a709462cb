// src/watch/step.rs

//! Pure tick logic.
//!
//! [`plan_tick`] turns `(state, config, scan result)` into the next state
//! and the evaluation jobs to dispatch. It performs no IO, so the diff rules
//! can be tested without a broker, a filesystem or a runtime.
//!
//! Rules:
//! - dispatched = `current - known` (additions only);
//! - next known = `current`, so deleted artifacts are forgotten and count
//!   as new if they come back;
//! - a failed scan dispatches nothing and keeps `known` as it was.

use crate::errors::{AssayerError, Result};
use crate::eval::EvaluationJob;
use crate::types::{ArtifactRef, KnownSet};
use crate::watch::state::{WatchConfig, WatchState};

/// Outcome of planning one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickPlan {
    /// State to hand to the successor tick.
    pub next: WatchState,
    /// One job per newly observed artifact, in no meaningful order.
    pub dispatch: Vec<EvaluationJob>,
    /// Set when the scan failed and the tick was skipped.
    pub scan_error: Option<String>,
}

impl TickPlan {
    pub fn new_artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.dispatch.iter().map(|job| &job.artifact)
    }
}

/// Plan one tick from the previous state and this tick's scan.
pub fn plan_tick(
    state: &WatchState,
    config: &WatchConfig,
    scan: Result<KnownSet>,
) -> TickPlan {
    let tick = state.tick + 1;

    match scan {
        Ok(current) => {
            let dispatch = current
                .added_since(&state.known)
                .into_iter()
                .map(|artifact| EvaluationJob::new(config.evaluator.clone(), artifact))
                .collect();

            TickPlan {
                next: WatchState {
                    stream: state.stream.clone(),
                    tick,
                    known: current,
                },
                dispatch,
                scan_error: None,
            }
        }
        Err(err) => {
            let reason = match err {
                AssayerError::ScanFailed { reason, .. } => reason,
                other => other.to_string(),
            };
            TickPlan {
                next: WatchState {
                    stream: state.stream.clone(),
                    tick,
                    known: state.known.clone(),
                },
                dispatch: Vec::new(),
                scan_error: Some(reason),
            }
        }
    }
}

/// Remove artifacts whose dispatch failed from `known`, so the next tick
/// sees them as new again.
pub fn forget_undispatched(next: &mut WatchState, failed: &[ArtifactRef]) {
    if failed.is_empty() {
        return;
    }
    next.known = next
        .known
        .iter()
        .filter(|a| !failed.contains(*a))
        .cloned()
        .collect();
}
