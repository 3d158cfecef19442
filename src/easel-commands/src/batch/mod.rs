//! Batch execution of many command invocations.
//!
//! A batch is an ordered list of [`BatchRequest`]s. The [`BatchExecutor`]
//! runs them sequentially or with bounded parallelism, applies per-request and
//! global timeouts, and stops dispatching after a failure unless the request
//! (or the batch) asks to continue. Results always come back in request order.

mod executor;
mod log;
mod options;
mod report;

pub use executor::BatchExecutor;
pub use log::{ExecutionLog, LogEntry};
pub use options::BatchOptions;
pub use report::{BatchItemResult, BatchReport, SkipReason, SkippedRequest};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BatchError;
use crate::params::Parameters;

/// One command invocation within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Command to run
    pub command_id: String,

    /// Parameters passed to the command
    #[serde(default)]
    pub parameters: Parameters,

    /// Overrides the batch-level continue-on-error flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,

    /// Per-request timeout (in milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Free-form label for reports and logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BatchRequest {
    pub fn new(command_id: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            parameters: Parameters::new(),
            continue_on_error: None,
            timeout_ms: None,
            description: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = Some(continue_on_error);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Continue-on-error flag after applying the batch default.
    pub fn effective_continue_on_error(&self, options: &BatchOptions) -> bool {
        self.continue_on_error.unwrap_or(options.continue_on_error)
    }

    /// Timeout after applying the batch default.
    pub fn effective_timeout(&self, options: &BatchOptions) -> Option<Duration> {
        self.timeout_ms
            .map(Duration::from_millis)
            .or_else(|| options.default_timeout())
    }
}

/// A batch as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchFile {
    /// Options; when absent the caller's defaults apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BatchOptions>,

    /// Requests in execution order
    #[serde(default)]
    pub requests: Vec<BatchRequest>,
}

impl BatchFile {
    pub fn from_json(content: &str) -> Result<Self, BatchError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml(content: &str) -> Result<Self, BatchError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a batch file. `.toml` files are parsed as TOML, anything else as JSON.
    pub async fn load(path: &Path) -> Result<Self, BatchError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| BatchError::Read {
                path: path.display().to_string(),
                source,
            })?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// The file's options, or `defaults` when it has none.
    pub fn options_or(&self, defaults: &BatchOptions) -> BatchOptions {
        self.options.clone().unwrap_or_else(|| defaults.clone())
    }
}
