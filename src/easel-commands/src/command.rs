//! The command contract.
//!
//! Every command follows the same lifecycle for each invocation:
//!
//! ```text
//! Idle → Preparing → Ready → Executing → CleaningUp → Completed | Failed | Cancelled
//! ```
//!
//! `prepare` runs first, `can_execute` is checked right before `execute`, and
//! `cleanup` always runs once `prepare` has been attempted. The
//! [`Invocation`](crate::Invocation) wrapper enforces this ordering; command
//! implementations only supply the steps.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::context::CommandContext;
use crate::error::CommandError;
use crate::params::{ParameterSchema, Parameters};
use crate::result::CommandResult;

/// Menu category used to group and order commands.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    File,
    Edit,
    View,
    Image,
    Layer,
    Select,
    Filter,
    Tools,
    Window,
    Help,
    Automation,
    #[default]
    Other,
}

impl CommandCategory {
    pub const ALL: [CommandCategory; 12] = [
        Self::File,
        Self::Edit,
        Self::View,
        Self::Image,
        Self::Layer,
        Self::Select,
        Self::Filter,
        Self::Tools,
        Self::Window,
        Self::Help,
        Self::Automation,
        Self::Other,
    ];

    /// Parse a category name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Edit => "edit",
            Self::View => "view",
            Self::Image => "image",
            Self::Layer => "layer",
            Self::Select => "select",
            Self::Filter => "filter",
            Self::Tools => "tools",
            Self::Window => "window",
            Self::Help => "help",
            Self::Automation => "automation",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Static description of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    /// Stable unique identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Description shown in menus and help
    #[serde(default)]
    pub description: String,

    /// Category for grouping
    #[serde(default)]
    pub category: CommandCategory,

    /// Ordering within a category, lower first
    #[serde(default)]
    pub priority: i32,

    /// Keyboard shortcut, e.g. `Ctrl+N`
    #[serde(default)]
    pub shortcut: Option<String>,

    /// Initial enabled flag
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Initial visible flag
    #[serde(default = "default_true")]
    pub visible: bool,

    /// Declared parameters
    #[serde(default)]
    pub parameters: ParameterSchema,
}

fn default_true() -> bool {
    true
}

impl CommandDescriptor {
    /// Create a descriptor with default category, priority and flags.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: CommandCategory::default(),
            priority: 0,
            shortcut: None,
            enabled: true,
            visible: true,
            parameters: ParameterSchema::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: CommandCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_shortcut(mut self, shortcut: impl Into<String>) -> Self {
        self.shortcut = Some(shortcut.into());
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Lifecycle state of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Idle,
    Preparing,
    Ready,
    Executing,
    CleaningUp,
    Completed,
    Failed,
    Cancelled,
}

impl InvocationState {
    /// Whether the invocation has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Terminal state matching a result.
    pub fn for_result(result: &CommandResult) -> Self {
        match result {
            CommandResult::Success { .. } => Self::Completed,
            CommandResult::Failure { .. } => Self::Failed,
            CommandResult::Cancelled { .. } | CommandResult::TimedOut { .. } => Self::Cancelled,
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::CleaningUp => "cleaning_up",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A unit of work contributed by a plugin.
#[async_trait]
pub trait Command: Send + Sync {
    /// Static description of this command.
    fn descriptor(&self) -> &CommandDescriptor;

    /// Whether several invocations of this instance may run at once.
    ///
    /// Non-reentrant commands reject a new invocation while one is executing.
    fn reentrant(&self) -> bool {
        false
    }

    /// Optional setup before execution.
    async fn prepare(&self, _ctx: &CommandContext) -> Result<(), CommandError> {
        Ok(())
    }

    /// Whether the command can run with these parameters.
    ///
    /// Must be side-effect free and must not block; UIs poll it to enable or
    /// disable affordances.
    fn can_execute(&self, _ctx: &CommandContext, _params: &Parameters) -> bool {
        true
    }

    /// Perform the work.
    ///
    /// Implementations check `cancel` at every safe point and return
    /// [`CommandResult::Cancelled`] (or `Err(CommandError::Cancelled)`) when
    /// it fires.
    async fn execute(
        &self,
        ctx: &CommandContext,
        params: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, CommandError>;

    /// Release resources. Runs after every execution attempt.
    async fn cleanup(
        &self,
        _ctx: &CommandContext,
        _cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        Ok(())
    }

    /// Called once when the command is removed from the registry.
    fn dispose(&self) -> Result<(), CommandError> {
        Ok(())
    }
}
