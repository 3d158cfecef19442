//! Built-in commands.
//!
//! The `core` plugin is always available. It carries a few commands that
//! exercise the command machinery without any image document loaded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::command::{Command, CommandCategory, CommandDescriptor};
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::params::{ParameterKind, ParameterSchema, ParameterSpec, Parameters};
use crate::plugin::{CommandBundle, RegistrationPolicy};
use crate::progress::ProgressUpdate;
use crate::registry::CommandRegistry;
use crate::result::CommandResult;

/// Plugin id of the built-in commands.
pub const CORE_PLUGIN_ID: &str = "core";

const WAIT_STEPS: u64 = 10;

/// Bundle with every built-in command.
pub fn core_plugin() -> CommandBundle {
    CommandBundle::new(CORE_PLUGIN_ID)
        .with_policy(RegistrationPolicy::ContinueOnError)
        .with_command(Arc::new(EchoCommand::new()))
        .with_command(Arc::new(WaitCommand::new()))
        .with_command(Arc::new(ListCommandsCommand::new()))
}

/// `core.echo`: returns its `text` parameter.
pub struct EchoCommand {
    descriptor: CommandDescriptor,
}

impl EchoCommand {
    pub fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new("core.echo", "Echo")
                .with_description("Print a message")
                .with_category(CommandCategory::Automation)
                .with_parameters(ParameterSchema::new().with(
                    "text",
                    ParameterSpec::new(ParameterKind::String)
                        .required()
                        .describe("Message to print"),
                )),
        }
    }
}

impl Default for EchoCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for EchoCommand {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn reentrant(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        params: &Parameters,
        _cancel: &CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(CommandResult::success(text))
    }
}

/// `core.wait`: sleeps, reporting progress, until done or cancelled.
pub struct WaitCommand {
    descriptor: CommandDescriptor,
}

impl WaitCommand {
    pub fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new("core.wait", "Wait")
                .with_description("Wait for a number of milliseconds")
                .with_category(CommandCategory::Automation)
                .with_priority(10)
                .with_parameters(ParameterSchema::new().with(
                    "duration_ms",
                    ParameterSpec::new(ParameterKind::Integer)
                        .with_default(1000)
                        .describe("How long to wait"),
                )),
        }
    }
}

impl Default for WaitCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for WaitCommand {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn reentrant(&self) -> bool {
        true
    }

    fn can_execute(&self, _ctx: &CommandContext, params: &Parameters) -> bool {
        params
            .get("duration_ms")
            .and_then(Value::as_i64)
            .is_none_or(|ms| ms >= 0)
    }

    async fn execute(
        &self,
        ctx: &CommandContext,
        params: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        let total = params
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(1000);
        let step = total / WAIT_STEPS;

        for done in 1..=WAIT_STEPS {
            // The last step also covers what the division dropped
            let ms = if done == WAIT_STEPS {
                step + total % WAIT_STEPS
            } else {
                step
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(CommandError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            }
            ctx.report_progress(
                ProgressUpdate::from_fraction(done, WAIT_STEPS).with_description("Waiting"),
            );
        }

        Ok(CommandResult::success(format!("Waited {total} ms")))
    }
}

/// `core.commands`: lists registered commands.
///
/// Needs the host's `Arc<CommandRegistry>` among the context services.
pub struct ListCommandsCommand {
    descriptor: CommandDescriptor,
}

impl ListCommandsCommand {
    pub fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new("core.commands", "List Commands")
                .with_description("List registered commands")
                .with_category(CommandCategory::Help)
                .with_parameters(ParameterSchema::new().with(
                    "category",
                    ParameterSpec::new(ParameterKind::String).describe("Only this category"),
                )),
        }
    }
}

impl Default for ListCommandsCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for ListCommandsCommand {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn can_execute(&self, ctx: &CommandContext, _params: &Parameters) -> bool {
        ctx.service::<CommandRegistry>().is_some()
    }

    async fn execute(
        &self,
        ctx: &CommandContext,
        params: &Parameters,
        _cancel: &CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        let registry = ctx
            .service::<CommandRegistry>()
            .ok_or_else(|| CommandError::failed("command registry is not available"))?;

        let handles = match params.get("category").and_then(Value::as_str) {
            Some(name) => {
                let category = CommandCategory::parse(name).ok_or_else(|| {
                    CommandError::failed(format!("unknown category '{name}'"))
                })?;
                registry.list_by_category(category)
            }
            None => registry.list(),
        };

        let commands: Vec<Value> = handles
            .iter()
            .map(|h| {
                let d = h.descriptor();
                json!({
                    "id": d.id,
                    "name": d.name,
                    "category": d.category,
                    "shortcut": d.shortcut,
                    "enabled": h.is_enabled(),
                })
            })
            .collect();

        let mut data = Parameters::new();
        data.insert("commands".to_string(), Value::Array(commands));
        Ok(CommandResult::success(format!("{} commands", handles.len())).with_data(data))
    }
}
