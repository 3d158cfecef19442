//! Persistent execution log.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use super::options::BatchOptions;
use super::report::{BatchItemResult, SkipReason, SkippedRequest};
use super::BatchRequest;
use crate::error::BatchError;

/// Record of one request in the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: usize,
    pub request: BatchRequest,

    /// `success`, `failure`, `cancelled`, `timed_out` or `not_executed`
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Log of a whole batch run, one entry per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub options: BatchOptions,
    pub entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub(crate) fn build(
        batch_id: Uuid,
        started_at: DateTime<Utc>,
        requests: &[BatchRequest],
        options: &BatchOptions,
        results: &[BatchItemResult],
        skipped: &[SkippedRequest],
    ) -> Self {
        let mut entries: Vec<LogEntry> = results
            .iter()
            .map(|item| LogEntry {
                index: item.index,
                request: requests[item.index].clone(),
                status: item.result.status().to_string(),
                message: Some(item.result.message()),
                skip_reason: None,
                started_at: Some(item.started_at),
                finished_at: chrono::Duration::from_std(item.duration)
                    .ok()
                    .map(|elapsed| item.started_at + elapsed),
            })
            .chain(skipped.iter().map(|skip| LogEntry {
                index: skip.index,
                request: requests[skip.index].clone(),
                status: "not_executed".to_string(),
                message: Some(skip.reason.to_string()),
                skip_reason: Some(skip.reason),
                started_at: None,
                finished_at: None,
            }))
            .collect();
        entries.sort_by_key(|entry| entry.index);

        Self {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            options: options.clone(),
            entries,
        }
    }

    /// Persist the log as pretty JSON.
    ///
    /// The content goes to a temporary file next to `path` first and is then
    /// renamed into place, so readers never see a partial log.
    pub async fn write_to(&self, path: &Path) -> Result<(), BatchError> {
        let content = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &content)
            .await
            .map_err(|source| BatchError::Log {
                path: path.display().to_string(),
                source,
            })
    }

    /// Read a persisted log.
    pub async fn read_from(path: &Path) -> Result<Self, BatchError> {
        let content = fs::read(path).await.map_err(|source| BatchError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_slice(&content)?)
    }
}

async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("log"),
        std::process::id()
    ));
    fs::write(&temp_path, content).await?;

    #[cfg(windows)]
    if fs::try_exists(path).await.unwrap_or(false) {
        let _ = fs::remove_file(path).await;
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}
