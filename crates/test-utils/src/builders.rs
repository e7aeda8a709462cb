#![allow(dead_code)]

use std::time::Duration;

use assayer::config::RawConfigFile;
use assayer::watch::{DEFAULT_PATTERN, WatchConfig};

/// Builder for `WatchConfig` with test-friendly defaults: an instant
/// polling interval and the `assayer.noop` evaluator.
pub struct WatchConfigBuilder {
    config: WatchConfig,
}

impl WatchConfigBuilder {
    pub fn new(directory: &str) -> Self {
        Self {
            config: WatchConfig {
                directory: directory.to_string(),
                pattern: DEFAULT_PATTERN.to_string(),
                polling_interval: Duration::from_millis(1),
                watch_queue: "watch".to_string(),
                eval_queue: "evaluation".to_string(),
                evaluator: "assayer.noop".to_string(),
            },
        }
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.config.pattern = pattern.to_string();
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.config.polling_interval = interval;
        self
    }

    pub fn queues(mut self, watch: &str, eval: &str) -> Self {
        self.config.watch_queue = watch.to_string();
        self.config.eval_queue = eval.to_string();
        self
    }

    pub fn evaluator(mut self, reference: &str) -> Self {
        self.config.evaluator = reference.to_string();
        self
    }

    pub fn build(self) -> WatchConfig {
        self.config
    }
}

/// Builder for `RawConfigFile`, as if parsed from an `Assayer.toml`.
pub struct RawConfigBuilder {
    config: RawConfigFile,
}

impl RawConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    /// Directory and evaluator, the two keys without a default.
    pub fn watching(mut self, directory: &str, evaluator: &str) -> Self {
        self.config.watch.directory = Some(directory.to_string());
        self.config.watch.evaluator = Some(evaluator.to_string());
        self
    }

    pub fn regex_filter(mut self, pattern: &str) -> Self {
        self.config.watch.regex_filter = Some(pattern.to_string());
        self
    }

    pub fn polling_interval(mut self, secs: f64) -> Self {
        self.config.watch.polling_interval = Some(secs);
        self
    }

    pub fn queues(mut self, watch: &str, eval: &str) -> Self {
        self.config.watch.watch_queue = Some(watch.to_string());
        self.config.watch.eval_queue = Some(eval.to_string());
        self
    }

    pub fn workers(mut self, watch: usize, eval: usize) -> Self {
        self.config.workers.watch = Some(watch);
        self.config.workers.eval = Some(eval);
        self
    }

    pub fn build(self) -> RawConfigFile {
        self.config
    }
}

impl Default for RawConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
