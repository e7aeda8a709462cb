// src/watch/mod.rs

//! The self-perpetuating watch chain.
//!
//! A chain is a sequence of ticks. Each tick scans the watched directory,
//! dispatches one evaluation job per artifact it has not seen before, rests
//! for the polling interval and then schedules its own successor. The only
//! state is the [`WatchState`] carried in the successor's payload.
//!
//! - [`patterns`] compiles the artifact filter.
//! - [`scanner`] lists matching artifacts through the `FileSystem` seam.
//! - [`state`] holds the config, the carried state and the versioned payload.
//! - [`step`] is the pure diff/plan logic.
//! - [`task`] runs one tick with its IO.
//! - [`chain`] seeds a chain and triggers successors.
//! - [`driver`] runs a chain in-process for `--inline` and registers it
//!   with the broker.

pub mod chain;
pub mod driver;
pub mod patterns;
pub mod scanner;
pub mod state;
pub mod step;
pub mod task;

pub use chain::{
    ChainOptions, ChainScheduler, ChainStart, InlineChain, QueueChain, active_chain_entries,
    inline_holder_queue, inline_holders, seed, start_chain,
};
pub use driver::{InlineHold, run_inline};
pub use patterns::{ArtifactFilter, DEFAULT_PATTERN};
pub use scanner::CheckpointScanner;
pub use state::{StreamId, WATCH_CALLABLE, WatchConfig, WatchPayload, WatchState};
pub use step::{TickPlan, forget_undispatched, plan_tick};
pub use task::{TickReport, WatchContext, run_tick};
