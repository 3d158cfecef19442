//! Live registry entries.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::command::{Command, CommandDescriptor};
use crate::context::CommandContext;
use crate::params::Parameters;

/// Enabled/visible flags of a registered command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFlags {
    pub enabled: bool,
    pub visible: bool,
}

/// A command as held by the registry.
///
/// The handle owns the runtime flags of the command and the guard that keeps
/// a single instance from executing twice at the same time.
pub struct CommandHandle {
    command: Arc<dyn Command>,
    flags: watch::Sender<CommandFlags>,
    executing: AtomicBool,
}

impl CommandHandle {
    /// Wrap a command, taking initial flags from its descriptor.
    pub fn new(command: Arc<dyn Command>) -> Self {
        let descriptor = command.descriptor();
        let (flags, _) = watch::channel(CommandFlags {
            enabled: descriptor.enabled,
            visible: descriptor.visible,
        });
        Self {
            command,
            flags,
            executing: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.command.descriptor().id
    }

    pub fn descriptor(&self) -> &CommandDescriptor {
        self.command.descriptor()
    }

    pub fn command(&self) -> &Arc<dyn Command> {
        &self.command
    }

    pub fn flags(&self) -> CommandFlags {
        *self.flags.borrow()
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.borrow().enabled
    }

    pub fn is_visible(&self) -> bool {
        self.flags.borrow().visible
    }

    pub fn has_shortcut(&self) -> bool {
        self.descriptor().shortcut.is_some()
    }

    /// Set the enabled flag. Returns true if it changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.flags.send_if_modified(|flags| {
            let changed = flags.enabled != enabled;
            flags.enabled = enabled;
            changed
        })
    }

    /// Set the visible flag. Returns true if it changed.
    pub fn set_visible(&self, visible: bool) -> bool {
        self.flags.send_if_modified(|flags| {
            let changed = flags.visible != visible;
            flags.visible = visible;
            changed
        })
    }

    /// Receive a notification whenever the flags change.
    pub fn subscribe_state(&self) -> watch::Receiver<CommandFlags> {
        self.flags.subscribe()
    }

    /// Whether an invocation of this instance is in flight.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Whether the command can be invoked right now with these parameters.
    pub fn can_execute(&self, ctx: &CommandContext, params: &Parameters) -> bool {
        self.is_enabled() && !self.is_executing() && self.command.can_execute(ctx, params)
    }

    /// Mark the instance as executing. Returns `None` if it already is.
    pub(crate) fn try_begin(&self) -> Option<ExecutionGuard<'_>> {
        self.executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ExecutionGuard { handle: self })
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle")
            .field("id", &self.id())
            .field("flags", &self.flags())
            .field("executing", &self.is_executing())
            .finish()
    }
}

/// Clears the executing flag when dropped.
pub(crate) struct ExecutionGuard<'a> {
    handle: &'a CommandHandle,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.handle.executing.store(false, Ordering::Release);
    }
}
