//! Batch executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::BatchRequest;
use super::log::ExecutionLog;
use super::options::BatchOptions;
use super::report::{BatchItemResult, BatchReport, SkipReason, SkippedRequest};
use crate::context::{CommandContext, ExecutionMode};
use crate::error::{BatchError, CommandError};
use crate::invocation::Invocation;
use crate::registry::CommandRegistry;
use crate::result::CommandResult;

/// Cancellation state shared by everything running in one batch.
#[derive(Clone)]
struct BatchControl {
    caller: CancellationToken,
    batch: CancellationToken,
    timed_out: Arc<AtomicBool>,
}

impl BatchControl {
    fn new(caller: CancellationToken) -> Self {
        Self {
            batch: caller.child_token(),
            caller,
            timed_out: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Why no further requests may start, if they may not.
    fn stop_reason(&self) -> Option<SkipReason> {
        if self.caller.is_cancelled() {
            Some(SkipReason::Cancelled)
        } else if self.batch.is_cancelled() {
            Some(SkipReason::GlobalTimeout)
        } else {
            None
        }
    }

    fn start_timer(&self, timeout: Duration) -> tokio::task::JoinHandle<()> {
        let batch = self.batch.clone();
        let timed_out = self.timed_out.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    timed_out.store(true, Ordering::SeqCst);
                    batch.cancel();
                }
                _ = batch.cancelled() => {}
            }
        })
    }
}

/// Runs batches of command invocations against a registry.
pub struct BatchExecutor {
    registry: Arc<CommandRegistry>,
    context: Arc<CommandContext>,
}

impl BatchExecutor {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self {
            registry,
            context: Arc::new(CommandContext::automation()),
        }
    }

    /// Base context. Every request runs in a fork of it, in automation mode.
    pub fn with_context(mut self, context: CommandContext) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Run a batch.
    pub async fn run(
        &self,
        requests: &[BatchRequest],
        options: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        self.run_with_cancel(requests, options, CancellationToken::new())
            .await
    }

    /// Run a batch that the caller can cancel.
    ///
    /// Cancelling stops new requests from starting and cancels the ones in
    /// flight; the report still accounts for every request.
    pub async fn run_with_cancel(
        &self,
        requests: &[BatchRequest],
        options: &BatchOptions,
        cancel: CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        if options.validate_before_execution {
            self.validate(requests)?;
        }

        let batch_id = Uuid::new_v4();
        let span = info_span!("batch", %batch_id, requests = requests.len());
        self.execute(batch_id, requests, options, cancel)
            .instrument(span)
            .await
    }

    /// Resolve every command and parameter set without running anything.
    pub fn validate(&self, requests: &[BatchRequest]) -> Result<(), BatchError> {
        for (index, request) in requests.iter().enumerate() {
            let handle = self.registry.get(&request.command_id).ok_or_else(|| {
                BatchError::UnknownCommand {
                    index,
                    command_id: request.command_id.clone(),
                }
            })?;

            handle
                .descriptor()
                .parameters
                .validate(&request.parameters)
                .map_err(|source| BatchError::InvalidParameters {
                    index,
                    command_id: request.command_id.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        batch_id: Uuid,
        requests: &[BatchRequest],
        options: &BatchOptions,
        cancel: CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        info!(
            "Starting batch with {} requests (parallelism {})",
            requests.len(),
            options.max_parallelism
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let control = BatchControl::new(cancel);
        let timer = options
            .global_timeout()
            .map(|timeout| control.start_timer(timeout));

        let (results, not_executed, halted) = if options.is_parallel() {
            self.run_parallel(requests, options, &control).await
        } else {
            self.run_sequential(requests, options, &control).await
        };

        if let Some(timer) = timer {
            timer.abort();
        }

        let timed_out = control.timed_out.load(Ordering::SeqCst);
        let cancelled = control.caller.is_cancelled();

        let log = options.capture_log.then(|| {
            ExecutionLog::build(
                batch_id,
                started_at,
                requests,
                options,
                &results,
                &not_executed,
            )
        });

        let mut log_path = None;
        if let (Some(log), Some(path)) = (&log, &options.log_path) {
            match log.write_to(path).await {
                Ok(()) => {
                    debug!("Wrote execution log to {}", path.display());
                    log_path = Some(path.clone());
                }
                Err(e) => warn!("{}", e),
            }
        }

        let report = BatchReport {
            batch_id,
            results,
            not_executed,
            halted,
            timed_out,
            cancelled,
            started_at,
            duration: clock.elapsed(),
            log,
            log_path,
        };
        info!("Batch finished: {}", report.summary());
        Ok(report)
    }

    async fn run_sequential(
        &self,
        requests: &[BatchRequest],
        options: &BatchOptions,
        control: &BatchControl,
    ) -> (Vec<BatchItemResult>, Vec<SkippedRequest>, bool) {
        let mut results = Vec::with_capacity(requests.len());
        let mut skipped = Vec::new();
        let mut halted = false;

        for (index, request) in requests.iter().enumerate() {
            let reason = control
                .stop_reason()
                .or(halted.then_some(SkipReason::Halted));
            if let Some(reason) = reason {
                skipped.push(skip(index, request, reason));
                continue;
            }

            let item = run_item(
                self.registry.clone(),
                self.context.clone(),
                index,
                request.clone(),
                request.effective_timeout(options),
                control.batch.child_token(),
            )
            .await;

            if !item.is_success()
                && !request.effective_continue_on_error(options)
                && control.stop_reason().is_none()
            {
                info!(
                    "Request #{} ({}) failed, stopping batch",
                    index, request.command_id
                );
                halted = true;
            }
            results.push(item);
        }

        (results, skipped, halted)
    }

    async fn run_parallel(
        &self,
        requests: &[BatchRequest],
        options: &BatchOptions,
        control: &BatchControl,
    ) -> (Vec<BatchItemResult>, Vec<SkippedRequest>, bool) {
        // Never more permits than requests, and never above what tokio accepts.
        let permits = options
            .max_parallelism
            .min(requests.len().max(1))
            .min(Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let halt = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut dispatched = HashMap::new();
        let mut skipped = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            if halt.load(Ordering::SeqCst) {
                skipped.push(skip(index, request, SkipReason::Halted));
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = control.batch.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            // A failing item raises the halt flag before it releases its
            // permit, so this check sees it before the slot is reused.
            let reason = control.stop_reason().or(halt
                .load(Ordering::SeqCst)
                .then_some(SkipReason::Halted));
            let permit = match (permit, reason) {
                (Some(permit), None) => permit,
                (_, reason) => {
                    let reason = reason.unwrap_or(SkipReason::Cancelled);
                    skipped.push(skip(index, request, reason));
                    continue;
                }
            };

            let registry = self.registry.clone();
            let context = self.context.clone();
            let request = request.clone();
            let timeout = request.effective_timeout(options);
            let continue_on_error = request.effective_continue_on_error(options);
            let control = control.clone();
            let halt = halt.clone();
            let command_id = request.command_id.clone();

            let handle = tasks.spawn(async move {
                let item = run_item(
                    registry,
                    context,
                    index,
                    request,
                    timeout,
                    control.batch.child_token(),
                )
                .await;

                if !item.is_success() && !continue_on_error && control.stop_reason().is_none() {
                    info!(
                        "Request #{} ({}) failed, no further requests will start",
                        index, item.command_id
                    );
                    halt.store(true, Ordering::SeqCst);
                }
                drop(permit);
                item
            });
            dispatched.insert(handle.id(), (index, command_id));
        }

        let mut results = Vec::with_capacity(dispatched.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, item)) => results.push(item),
                Err(e) => {
                    let Some((index, command_id)) = dispatched.get(&e.id()).cloned() else {
                        error!("Unknown batch task failed: {}", e);
                        continue;
                    };
                    error!("Batch task for request #{} failed: {}", index, e);
                    halt.store(true, Ordering::SeqCst);
                    results.push(BatchItemResult {
                        index,
                        command_id,
                        description: requests[index].description.clone(),
                        result: CommandResult::failure_with_cause("Batch task failed", &e),
                        error: Some(e.to_string()),
                        started_at: Utc::now(),
                        duration: Duration::ZERO,
                    });
                }
            }
        }

        results.sort_by_key(|item| item.index);
        (results, skipped, halt.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn skip(index: usize, request: &BatchRequest, reason: SkipReason) -> SkippedRequest {
    debug!("Request #{} ({}) not executed: {}", index, request.command_id, reason);
    SkippedRequest {
        index,
        command_id: request.command_id.clone(),
        reason,
    }
}

async fn run_item(
    registry: Arc<CommandRegistry>,
    base: Arc<CommandContext>,
    index: usize,
    request: BatchRequest,
    timeout: Option<Duration>,
    cancel: CancellationToken,
) -> BatchItemResult {
    let started_at = Utc::now();
    let clock = Instant::now();

    let result = match registry.get(&request.command_id) {
        Some(handle) => {
            let context = base.fork().with_mode(ExecutionMode::Automation);
            Invocation::new(handle, context, request.parameters)
                .with_timeout(timeout)
                .with_cancel(cancel)
                .run()
                .await
        }
        None => CommandResult::failure(
            CommandError::NotFound(request.command_id.clone()).to_string(),
        ),
    };

    let error = match &result {
        CommandResult::Failure { cause, .. } => cause.clone(),
        _ => None,
    };

    BatchItemResult {
        index,
        command_id: request.command_id,
        description: request.description,
        result,
        error,
        started_at,
        duration: clock.elapsed(),
    }
}
