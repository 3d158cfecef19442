//! Batch execution options.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a batch is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Keep going after a failed request
    #[serde(default)]
    pub continue_on_error: bool,

    /// Maximum concurrent invocations; 1 runs the batch sequentially
    #[serde(default = "default_parallelism")]
    pub max_parallelism: usize,

    /// Limit for the whole batch (in milliseconds)
    #[serde(default)]
    pub global_timeout_ms: Option<u64>,

    /// Per-request limit when the request sets none (in milliseconds)
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,

    /// Resolve every command and parameter set before running anything
    #[serde(default = "default_true")]
    pub validate_before_execution: bool,

    /// Build an execution log
    #[serde(default)]
    pub capture_log: bool,

    /// Where to persist the execution log
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            max_parallelism: default_parallelism(),
            global_timeout_ms: None,
            default_timeout_ms: None,
            validate_before_execution: true,
            capture_log: false,
            log_path: None,
        }
    }
}

impl BatchOptions {
    /// Sequential execution with default settings.
    pub fn sequential() -> Self {
        Self::default()
    }

    /// Parallel execution with at most `max` concurrent invocations.
    pub fn parallel(max: usize) -> Self {
        Self {
            max_parallelism: max.max(1),
            ..Default::default()
        }
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.validate_before_execution = false;
        self
    }

    /// Capture the execution log, persisting it to `path` when given.
    pub fn with_log(mut self, path: Option<PathBuf>) -> Self {
        self.capture_log = true;
        self.log_path = path;
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.max_parallelism > 1
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout_ms.map(Duration::from_millis)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

fn default_parallelism() -> usize {
    1
}

fn default_true() -> bool {
    true
}
