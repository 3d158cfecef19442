//! Command invocation.
//!
//! [`Invocation`] drives one command through its lifecycle. [`Invoker`] looks
//! commands up in the registry, runs them and broadcasts [`InvocationEvent`]s
//! for observers such as a status bar or a script console.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::command::InvocationState;
use crate::context::{CommandContext, ConfigSource, EmptyConfig, ServiceProvider, Services};
use crate::error::{CommandError, panic_message};
use crate::handle::CommandHandle;
use crate::params::Parameters;
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::registry::CommandRegistry;
use crate::result::CommandResult;

const EVENT_CAPACITY: usize = 256;

/// Exit code for a successful command.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for an execution failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for usage, parameter and unknown-command errors.
pub const EXIT_USAGE: i32 = 2;
/// Exit code for a timed out invocation.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code for a cancelled invocation.
pub const EXIT_CANCELLED: i32 = 130;

/// Exit code for a terminal result.
pub fn exit_code_for(result: &CommandResult) -> i32 {
    match result {
        CommandResult::Success { .. } => EXIT_SUCCESS,
        CommandResult::Failure { .. } => EXIT_FAILURE,
        CommandResult::TimedOut { .. } => EXIT_TIMEOUT,
        CommandResult::Cancelled { .. } => EXIT_CANCELLED,
    }
}

enum Outcome {
    Finished(std::thread::Result<Result<CommandResult, CommandError>>),
    TimedOut(Duration),
    Cancelled,
}

/// One run of one command.
///
/// The lifecycle is strictly ordered: `prepare`, the `can_execute` check,
/// `execute`, then `cleanup`. Once `prepare` has been attempted `cleanup`
/// runs no matter how the earlier steps ended. Errors and panics raised by
/// the command become [`CommandResult::Failure`]; they never reach the caller.
pub struct Invocation {
    handle: Arc<CommandHandle>,
    context: CommandContext,
    params: Parameters,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    state: Mutex<InvocationState>,
}

impl Invocation {
    pub fn new(handle: Arc<CommandHandle>, context: CommandContext, params: Parameters) -> Self {
        Self {
            handle,
            context,
            params,
            timeout: None,
            cancel: CancellationToken::new(),
            state: Mutex::new(InvocationState::Idle),
        }
    }

    /// Bound the execute step. `None` means no limit.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use an external cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn command_id(&self) -> &str {
        self.handle.id()
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    /// Token that cancels this invocation.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InvocationState {
        *self.state.lock()
    }

    fn set_state(&self, state: InvocationState) {
        *self.state.lock() = state;
    }

    /// Run the lifecycle and return the terminal result.
    pub async fn run(&self) -> CommandResult {
        let span = info_span!(
            "invocation",
            command_id = %self.handle.id(),
            mode = %self.context.mode()
        );
        let result = self.run_lifecycle().instrument(span).await;
        self.set_state(InvocationState::for_result(&result));
        result
    }

    async fn run_lifecycle(&self) -> CommandResult {
        let id = self.handle.id();

        if !self.handle.is_enabled() {
            return rejected(CommandError::Disabled(id.to_string()));
        }

        let params = match self.handle.descriptor().parameters.resolve(&self.params) {
            Ok(params) => params,
            Err(e) => return rejected(e.into()),
        };

        let command = self.handle.command().clone();

        let _guard = if command.reentrant() {
            None
        } else {
            match self.handle.try_begin() {
                Some(guard) => Some(guard),
                None => return rejected(CommandError::Busy(id.to_string())),
            }
        };

        self.set_state(InvocationState::Preparing);
        let prepared = AssertUnwindSafe(command.prepare(&self.context))
            .catch_unwind()
            .await;

        let result = match prepared {
            Ok(Ok(())) => {
                self.set_state(InvocationState::Ready);
                self.execute_step(&params).await
            }
            Ok(Err(e)) if e.is_cancelled() => {
                debug!("Command {} cancelled during prepare", id);
                CommandResult::cancelled()
            }
            Ok(Err(e)) => {
                debug!("Command {} failed to prepare: {}", id, e);
                CommandResult::failure_with_cause(format!("Command '{id}' failed to prepare"), e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("Command {} panicked during prepare: {}", id, message);
                CommandResult::failure_with_cause(format!("Command '{id}' panicked"), message)
            }
        };

        self.set_state(InvocationState::CleaningUp);
        let cleaned = AssertUnwindSafe(command.cleanup(&self.context, &self.cancel))
            .catch_unwind()
            .await;
        match cleaned {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Cleanup of command {} failed: {}", id, e),
            Err(payload) => warn!(
                "Command {} panicked during cleanup: {}",
                id,
                panic_message(payload.as_ref())
            ),
        }

        result
    }

    async fn execute_step(&self, params: &Parameters) -> CommandResult {
        let id = self.handle.id();
        let command = self.handle.command();

        let allowed = std::panic::catch_unwind(AssertUnwindSafe(|| {
            command.can_execute(&self.context, params)
        }))
        .unwrap_or(false);
        if !allowed {
            return rejected(CommandError::NotExecutable(id.to_string()));
        }

        self.set_state(InvocationState::Executing);

        let exec_token = self.cancel.child_token();
        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    after
                }
                None => std::future::pending::<Duration>().await,
            }
        };
        let execute =
            AssertUnwindSafe(command.execute(&self.context, params, &exec_token)).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Outcome::Cancelled,
            after = deadline => Outcome::TimedOut(after),
            finished = execute => Outcome::Finished(finished),
        };

        // Abandoned executions observe this at their next check.
        exec_token.cancel();

        match outcome {
            Outcome::Finished(Ok(Ok(result))) => {
                if result.is_cancelled() {
                    debug!("Command {} cancelled", id);
                }
                result
            }
            Outcome::Finished(Ok(Err(e))) if e.is_cancelled() => {
                debug!("Command {} cancelled", id);
                CommandResult::cancelled()
            }
            Outcome::Finished(Ok(Err(e))) => {
                debug!("Command {} failed: {}", id, e);
                CommandResult::failure_with_cause(format!("Command '{id}' failed"), e)
            }
            Outcome::Finished(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!("Command {} panicked: {}", id, message);
                CommandResult::failure_with_cause(format!("Command '{id}' panicked"), message)
            }
            Outcome::TimedOut(after) => {
                debug!("Command {} timed out after {:?}", id, after);
                CommandResult::TimedOut { after }
            }
            Outcome::Cancelled => {
                debug!("Command {} cancelled", id);
                CommandResult::cancelled()
            }
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("command_id", &self.handle.id())
            .field("state", &self.state())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn rejected(err: CommandError) -> CommandResult {
    debug!("Invocation rejected: {}", err);
    CommandResult::failure(err.to_string())
}

/// Notifications broadcast by the [`Invoker`].
#[derive(Debug, Clone)]
pub enum InvocationEvent {
    Started {
        command_id: String,
    },
    Progress {
        command_id: String,
        progress: ProgressUpdate,
    },
    Completed {
        command_id: String,
        result: CommandResult,
        duration: Duration,
    },
}

/// Options for a single invocation.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl InvokeOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outcome of a command-line invocation.
#[derive(Debug, Clone)]
pub struct CliOutcome {
    /// Process exit code
    pub exit_code: i32,

    /// One-line summary
    pub message: String,

    /// Terminal result, absent when the lifecycle never started
    pub result: Option<CommandResult>,
}

impl CliOutcome {
    fn usage(message: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_USAGE,
            message: message.into(),
            result: None,
        }
    }

    fn from_result(result: CommandResult) -> Self {
        Self {
            exit_code: exit_code_for(&result),
            message: result.message(),
            result: Some(result),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

/// Runs registered commands and reports on them.
pub struct Invoker {
    registry: Arc<CommandRegistry>,
    services: Arc<dyn ServiceProvider>,
    config: Arc<dyn ConfigSource>,
    events: broadcast::Sender<InvocationEvent>,
}

impl Invoker {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            services: Arc::new(Services::new()),
            config: Arc::new(EmptyConfig),
            events,
        }
    }

    /// Services handed to contexts built by [`Invoker::context`].
    pub fn with_services(mut self, services: Arc<dyn ServiceProvider>) -> Self {
        self.services = services;
        self
    }

    /// Configuration handed to contexts built by [`Invoker::context`].
    pub fn with_config(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Subscribe to invocation events.
    pub fn subscribe(&self) -> broadcast::Receiver<InvocationEvent> {
        self.events.subscribe()
    }

    /// Fresh context carrying this invoker's services and configuration.
    pub fn context(&self, mode: crate::context::ExecutionMode) -> CommandContext {
        CommandContext::new(mode)
            .with_services(self.services.clone())
            .with_config(self.config.clone())
    }

    /// Invoke a command with default options.
    pub async fn invoke(
        &self,
        id: &str,
        params: Parameters,
        context: CommandContext,
    ) -> Result<CommandResult, CommandError> {
        self.invoke_with(id, params, context, InvokeOptions::default())
            .await
    }

    /// Invoke a command.
    ///
    /// Unknown commands and invalid parameters are returned as errors before
    /// the lifecycle starts. Anything that happens afterwards is reported in
    /// the result.
    pub async fn invoke_with(
        &self,
        id: &str,
        params: Parameters,
        context: CommandContext,
        options: InvokeOptions,
    ) -> Result<CommandResult, CommandError> {
        let handle = self
            .registry
            .get(id)
            .ok_or_else(|| CommandError::NotFound(id.to_string()))?;
        handle.descriptor().parameters.validate(&params)?;

        let events = self.events.clone();
        let command_id = id.to_string();
        let forward = ProgressSink::new(move |progress| {
            let _ = events.send(InvocationEvent::Progress {
                command_id: command_id.clone(),
                progress,
            });
        });
        let sink = match context.progress() {
            Some(existing) => existing.tee(forward),
            None => forward,
        };
        let context = context.with_progress(sink);

        let mut invocation = Invocation::new(handle, context, params).with_timeout(options.timeout);
        if let Some(cancel) = options.cancel {
            invocation = invocation.with_cancel(cancel);
        }

        let _ = self.events.send(InvocationEvent::Started {
            command_id: id.to_string(),
        });
        let started = Instant::now();
        let result = invocation.run().await;
        let _ = self.events.send(InvocationEvent::Completed {
            command_id: id.to_string(),
            result: result.clone(),
            duration: started.elapsed(),
        });

        Ok(result)
    }

    /// Invoke a command from flat string arguments, as a command line does.
    ///
    /// Values are converted with the command's parameter schema; defaults and
    /// required parameters are resolved before the lifecycle starts.
    pub async fn invoke_cli<I, K, V>(&self, id: &str, args: I, options: InvokeOptions) -> CliOutcome
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let Some(handle) = self.registry.get(id) else {
            return CliOutcome::usage(CommandError::NotFound(id.to_string()).to_string());
        };

        let params = match handle.descriptor().parameters.coerce_flat(args) {
            Ok(params) => params,
            Err(e) => return CliOutcome::usage(e.to_string()),
        };

        let context = self.context(crate::context::ExecutionMode::Scripted);
        match self.invoke_with(id, params, context, options).await {
            Ok(result) => CliOutcome::from_result(result),
            Err(e) => CliOutcome::usage(e.to_string()),
        }
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
