// src/watch/state.rs

//! Values carried from one watch tick to the next.
//!
//! The chain has no process-local state: everything the next tick needs
//! travels inside the successor's payload. The payload is versioned so a
//! deployment can change its shape without breaking chains already queued.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::JobSpec;
use crate::errors::{AssayerError, Result};
use crate::types::KnownSet;

/// Callable name of a watch tick on the queue.
pub const WATCH_CALLABLE: &str = "assayer.watch";

/// Immutable configuration threaded through every tick of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory whose direct children are scanned.
    pub directory: String,
    /// Filter source (regex, or `glob:<pattern>`).
    pub pattern: String,
    pub polling_interval: Duration,
    pub watch_queue: String,
    pub eval_queue: String,
    /// Evaluator reference handed to every evaluation job.
    pub evaluator: String,
}

impl WatchConfig {
    /// Identity of the logical watch stream this config describes.
    pub fn stream_id(&self) -> StreamId {
        StreamId::for_stream(&self.directory, &self.pattern, &self.watch_queue)
    }
}

/// Identity of one logical watch stream (directory + filter + watch queue).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn for_stream(directory: &str, pattern: &str, watch_queue: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [directory, pattern, watch_queue] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State that evolves from tick to tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchState {
    pub stream: StreamId,
    /// Number of ticks completed before this one.
    pub tick: u64,
    pub known: KnownSet,
}

impl WatchState {
    pub fn new(stream: StreamId, known: KnownSet) -> Self {
        Self {
            stream,
            tick: 0,
            known,
        }
    }
}

/// Serialized form of a watch tick, tagged by schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum WatchPayload {
    #[serde(rename = "1")]
    V1 {
        config: WatchConfig,
        state: WatchState,
    },
}

impl WatchPayload {
    /// Build a payload in the current schema version.
    pub fn current(config: WatchConfig, state: WatchState) -> Self {
        WatchPayload::V1 { config, state }
    }

    /// Upgrade (if needed) and split into config and state.
    pub fn into_parts(self) -> (WatchConfig, WatchState) {
        match self {
            WatchPayload::V1 { config, state } => (config, state),
        }
    }

    pub fn stream(&self) -> &StreamId {
        match self {
            WatchPayload::V1 { state, .. } => &state.stream,
        }
    }

    pub fn to_job_spec(&self) -> Result<JobSpec> {
        Ok(JobSpec::new(WATCH_CALLABLE, serde_json::to_value(self)?))
    }

    pub fn from_args(args: &Value) -> Result<Self> {
        WatchPayload::deserialize(args)
            .map_err(|e| AssayerError::InvalidPayload(format!("watch payload: {e}")))
    }
}
