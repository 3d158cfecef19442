//! Batch results.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::log::ExecutionLog;
use crate::invocation::{EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS, EXIT_TIMEOUT};
use crate::result::{CommandResult, duration_ms};

/// Result of one executed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    /// Position of the request in the batch
    pub index: usize,

    pub command_id: String,

    pub description: Option<String>,

    pub result: CommandResult,

    /// Underlying cause when the command raised an error
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Why a request never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// An earlier failure stopped dispatching.
    Halted,
    /// The batch's global timeout elapsed first.
    GlobalTimeout,
    /// The caller cancelled the batch.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted => write!(f, "halted after failure"),
            Self::GlobalTimeout => write!(f, "global timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A request that was not executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRequest {
    pub index: usize,
    pub command_id: String,
    pub reason: SkipReason,
}

/// Outcome of a whole batch.
///
/// `results` holds executed requests in request order; `not_executed` holds
/// the rest, so together they account for every request exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub results: Vec<BatchItemResult>,
    pub not_executed: Vec<SkippedRequest>,

    /// A failure stopped dispatching
    pub halted: bool,

    /// The global timeout elapsed
    pub timed_out: bool,

    /// The caller cancelled the batch
    pub cancelled: bool,

    pub started_at: DateTime<Utc>,

    #[serde(with = "duration_ms")]
    pub duration: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<ExecutionLog>,

    /// Where the execution log was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.results.len() + self.not_executed.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Every request ran and succeeded.
    pub fn is_success(&self) -> bool {
        self.not_executed.is_empty() && self.results.iter().all(|r| r.is_success())
    }

    /// Process exit code summarizing the batch.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else if self.cancelled {
            EXIT_CANCELLED
        } else if self.timed_out {
            EXIT_TIMEOUT
        } else {
            EXIT_FAILURE
        }
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} of {} requests succeeded, {} failed",
            self.succeeded(),
            self.total(),
            self.failed()
        );
        if !self.not_executed.is_empty() {
            summary.push_str(&format!(", {} not executed", self.not_executed.len()));
        }
        summary.push_str(&format!(" ({} ms)", self.duration.as_millis()));
        summary
    }
}
